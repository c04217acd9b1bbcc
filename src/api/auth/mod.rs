pub mod types;
pub mod login;
pub mod register;
pub mod password;
pub mod verify;

pub use login::*;
pub use register::*;
pub use password::*;
pub use verify::*;
