//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because it's needed by [`build!`](crate::build).
mod ctz;
mod init;
mod int;
pub(crate) mod intrusive_list;
mod prio_bitmap;
pub use self::{init::*, int::*, prio_bitmap::*};
