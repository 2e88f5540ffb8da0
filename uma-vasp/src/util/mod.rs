//! Process utilities of the server binary.

mod sig_down;

pub use sig_down::SigDown;
