mod expense;
mod money;
mod split;
mod trip;

pub use expense::*;
pub use money::*;
pub use split::*;
pub use trip::*;
