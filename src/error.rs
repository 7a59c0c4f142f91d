use crate::bus::IoRegister;
use crate::ines::CartridgeError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    #[error("mapper {0} is not supported")]
    UnsupportedMapper(u8),
    #[error("callback for {0:?} is already registered")]
    CallbackRegistration(IoRegister),
}
