//! ASCII commands understood by the bootloader.

use std::fmt;

use super::constants::{CMD_DUMP_STORAGE, CMD_GETVAR, VAR_ALL, VAR_PARTITION_SIZE};

/// Host -> device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `getvar:<name>`
    GetVar(String),
    /// `oem dump-storage <partition>`
    DumpStorage(String),
}

impl Command {
    /// `getvar:all`
    pub fn getvar_all() -> Self {
        Command::GetVar(VAR_ALL.to_string())
    }

    /// `getvar:partition-size:<partition>`
    pub fn partition_size(partition: &str) -> Self {
        Command::GetVar(format!("{}{}", VAR_PARTITION_SIZE, partition))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetVar(name) => write!(f, "{}{}", CMD_GETVAR, name),
            Command::DumpStorage(partition) => write!(f, "{}{}", CMD_DUMP_STORAGE, partition),
        }
    }
}
