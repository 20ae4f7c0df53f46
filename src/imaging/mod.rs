//! Post-processing applied to captured chart images.

pub mod fingerprint;
pub mod sidebar;

pub use fingerprint::{compute_fingerprint, fingerprint_distance};
pub use sidebar::SidebarCropper;
