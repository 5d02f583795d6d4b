//! `spimux`: a shared-bus SPI master transaction engine. Several logical
//! devices share one physical bus; the engine solves their clock dividers,
//! stages buffers for DMA, frames command/address headers and serializes
//! every transfer onto the wire through a single dispatcher per bus.
pub mod spi;
