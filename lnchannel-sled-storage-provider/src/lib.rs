//! # lnchannel-sled-storage-provider
//! Storage provider for lnchannel-manager using sled as underlying storage.

#![crate_name = "lnchannel_sled_storage_provider"]
// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate lnchannel_manager;
extern crate sled;

use lnchannel_manager::channel::ser::Serializable;
use lnchannel_manager::channel::{ChannelState, ChannelStatusType};
use lnchannel_manager::{error::Error, ChannelId, Storage};
use sled::Db;
use std::convert::TryInto;
use std::io::{Cursor, Read};

/// Implementation of Storage interface using the sled DB backend.
pub struct SledStorageProvider {
    db: Db,
}

macro_rules! convertible_enum {
    (enum $name:ident {
        $($vname:ident $(= $val:expr)?,)*
    }) => {
        #[derive(Debug)]
        enum $name {
            $($vname $(= $val)?,)*
        }

        impl From<$name> for u8 {
            fn from(prefix: $name) -> u8 {
                prefix as u8
            }
        }

        impl std::convert::TryFrom<u8> for $name {
            type Error = Error;

            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == u8::from($name::$vname) => Ok($name::$vname),)*
                    _ => Err(Error::StorageError("Unknown prefix".to_string())),
                }
            }
        }
    }
}

convertible_enum!(
    enum ChannelPrefix {
        Open = 1,
        PendingCommit,
        Committed,
        CooperativelyClosing,
        ForceClosed,
        Faulted,
    }
);

fn get_prefix(status_type: ChannelStatusType) -> u8 {
    let prefix = match status_type {
        ChannelStatusType::Open => ChannelPrefix::Open,
        ChannelStatusType::PendingCommit => ChannelPrefix::PendingCommit,
        ChannelStatusType::Committed => ChannelPrefix::Committed,
        ChannelStatusType::CooperativelyClosing => ChannelPrefix::CooperativelyClosing,
        ChannelStatusType::ForceClosed => ChannelPrefix::ForceClosed,
        ChannelStatusType::Faulted => ChannelPrefix::Faulted,
    };
    prefix.into()
}

fn to_storage_error<T>(e: T) -> Error
where
    T: std::fmt::Display,
{
    Error::StorageError(e.to_string())
}

impl SledStorageProvider {
    /// Creates a new instance of a SledStorageProvider.
    pub fn new(path: &str) -> Result<Self, sled::Error> {
        Ok(SledStorageProvider {
            db: sled::open(path)?,
        })
    }

    /// Returns the channels currently in the given status.
    pub fn get_channels_with_status(
        &self,
        status_type: ChannelStatusType,
    ) -> Result<Vec<ChannelState>, Error> {
        let prefix = get_prefix(status_type);
        let mut res = Vec::new();
        for value in self.db.iter().values() {
            let value = value.map_err(to_storage_error)?;
            if value.first() == Some(&prefix) {
                res.push(deserialize_channel(&value)?);
            }
        }
        Ok(res)
    }
}

impl Storage for SledStorageProvider {
    fn upsert_channel(&self, channel: &ChannelState) -> Result<(), Error> {
        let serialized = serialize_channel(channel)?;
        self.db
            .insert(channel.channel_id, serialized)
            .map_err(to_storage_error)?;
        self.db.flush().map_err(to_storage_error)?;
        Ok(())
    }

    fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, Error> {
        match self.db.get(channel_id).map_err(to_storage_error)? {
            Some(res) => Ok(Some(deserialize_channel(&res)?)),
            None => Ok(None),
        }
    }

    fn get_channels(&self) -> Result<Vec<ChannelState>, Error> {
        self.db
            .iter()
            .values()
            .map(|x| deserialize_channel(&x.map_err(to_storage_error)?))
            .collect()
    }

    fn delete_channel(&self, channel_id: &ChannelId) -> Result<(), Error> {
        self.db.remove(channel_id).map_err(to_storage_error)?;
        self.db.flush().map_err(to_storage_error)?;
        Ok(())
    }
}

fn serialize_channel(channel: &ChannelState) -> Result<Vec<u8>, Error> {
    let mut serialized = channel.serialize().map_err(to_storage_error)?;
    let mut res = Vec::with_capacity(serialized.len() + 1);
    res.push(get_prefix(channel.status.get_type()));
    res.append(&mut serialized);
    Ok(res)
}

fn deserialize_channel(buff: &sled::IVec) -> Result<ChannelState, Error> {
    let mut cursor = Cursor::new(buff);
    let mut prefix = [0u8; 1];
    cursor.read_exact(&mut prefix).map_err(to_storage_error)?;
    let _: ChannelPrefix = prefix[0].try_into()?;
    ChannelState::deserialize(&mut cursor).map_err(to_storage_error)
}
