pub mod authority;
pub mod snapshot;

pub use authority::MetaAuthority;
pub use snapshot::MetaSnapshot;
