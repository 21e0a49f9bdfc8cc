mod registration;
mod session;

pub use registration::*;
pub use session::*;
