pub mod conversion;
pub mod exchange_factory;
