pub mod periodic;
