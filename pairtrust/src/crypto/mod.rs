// Crypto module declarations

pub mod hash;
pub mod identity;
pub mod symmetric;
