pub mod crud;
pub mod types;
pub mod validator;

pub use crud::*;
pub use types::*;
pub use validator::*;
