use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// A release named a table id holding no reference. Only raised by a
    /// strict registry.
    #[error("release of table {id} which holds no reference")]
    Underflow { id: u64 },

    #[error("registry lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, RegistryError>;
