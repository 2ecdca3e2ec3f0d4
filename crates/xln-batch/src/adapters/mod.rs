pub mod internal;

pub use internal::InternalJurisdiction;
