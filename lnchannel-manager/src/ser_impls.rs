//! Serialization helpers for types used in channel state that do not implement
//! [`Writeable`] themselves.

use std::collections::BTreeSet;

use bitcoin::consensus::encode::{deserialize, serialize, Decodable, Encodable};
use bitcoin::{OutPoint, Script, Transaction, Txid};
use lightning::io::Read;
use lightning::ln::msgs::DecodeError;
use lightning::util::ser::{Readable, Writeable, Writer};
use lnchannel::CommitmentScheme;

const MAX_VEC_SIZE: u64 = 1000000;

/// Lightning TLV uses a custom variable-length integer called BigSize. It is similar to Bitcoin's
/// variable-length integers except that it is serialized in big-endian instead of little-endian.
pub struct BigSize(pub u64);
impl Writeable for BigSize {
    #[inline]
    fn write<W: Writer>(&self, writer: &mut W) -> Result<(), lightning::io::Error> {
        match self.0 {
            0..=0xFC => (self.0 as u8).write(writer),
            0xFD..=0xFFFF => {
                0xFDu8.write(writer)?;
                (self.0 as u16).write(writer)
            }
            0x10000..=0xFFFFFFFF => {
                0xFEu8.write(writer)?;
                (self.0 as u32).write(writer)
            }
            _ => {
                0xFFu8.write(writer)?;
                self.0.write(writer)
            }
        }
    }
}
impl Readable for BigSize {
    #[inline]
    fn read<R: Read>(reader: &mut R) -> Result<BigSize, DecodeError> {
        let n: u8 = Readable::read(reader)?;
        match n {
            0xFF => {
                let x: u64 = Readable::read(reader)?;
                if x < 0x100000000 {
                    Err(DecodeError::InvalidValue)
                } else {
                    Ok(BigSize(x))
                }
            }
            0xFE => {
                let x: u32 = Readable::read(reader)?;
                if x < 0x10000 {
                    Err(DecodeError::InvalidValue)
                } else {
                    Ok(BigSize(x as u64))
                }
            }
            0xFD => {
                let x: u16 = Readable::read(reader)?;
                if x < 0xFD {
                    Err(DecodeError::InvalidValue)
                } else {
                    Ok(BigSize(x as u64))
                }
            }
            n => Ok(BigSize(n as u64)),
        }
    }
}

/// Writes a vector of [`Writeable`], prefixed with its length.
pub fn write_vec<W: Writer, T>(input: &[T], writer: &mut W) -> Result<(), lightning::io::Error>
where
    T: Writeable,
{
    write_vec_cb(input, writer, &<T as Writeable>::write)
}

/// Reads a vector of [`Readable`] prefixed with its length.
pub fn read_vec<R: Read, T>(reader: &mut R) -> Result<Vec<T>, DecodeError>
where
    T: Readable,
{
    read_vec_cb(reader, &Readable::read)
}

/// Writes a vector using the given callback for each element.
pub fn write_vec_cb<W: Writer, T, F>(
    input: &[T],
    writer: &mut W,
    cb: &F,
) -> Result<(), lightning::io::Error>
where
    F: Fn(&T, &mut W) -> Result<(), lightning::io::Error>,
{
    BigSize(input.len() as u64).write(writer)?;
    for s in input {
        cb(s, writer)?;
    }
    Ok(())
}

/// Reads a vector using the given callback for each element.
pub fn read_vec_cb<R: Read, T, F>(reader: &mut R, cb: &F) -> Result<Vec<T>, DecodeError>
where
    F: Fn(&mut R) -> Result<T, DecodeError>,
{
    let len: BigSize = Readable::read(reader)?;
    if len.0 > MAX_VEC_SIZE {
        return Err(DecodeError::InvalidValue);
    }
    let mut res = Vec::<T>::new();
    for _ in 0..len.0 {
        res.push(cb(reader)?);
    }

    Ok(res)
}

/// Writes a `usize` as a `u64`.
pub fn write_usize<W: Writer>(i: &usize, writer: &mut W) -> Result<(), lightning::io::Error> {
    <u64 as Writeable>::write(&(*i as u64), writer)
}

/// Reads a `usize` written with [`write_usize`].
pub fn read_usize<R: Read>(reader: &mut R) -> Result<usize, DecodeError> {
    let i: u64 = Readable::read(reader)?;
    Ok(i as usize)
}

/// Writes an optional value, prefixed with a presence byte.
pub fn write_option<W: Writer, T>(t: &Option<T>, writer: &mut W) -> Result<(), lightning::io::Error>
where
    T: Writeable,
{
    match t {
        Some(t) => {
            1_u8.write(writer)?;
            t.write(writer)
        }
        None => 0_u8.write(writer),
    }
}

/// Reads an optional value written with [`write_option`].
pub fn read_option<R: Read, T>(reader: &mut R) -> Result<Option<T>, DecodeError>
where
    T: Readable,
{
    let prefix: u8 = Readable::read(reader)?;
    let res = match prefix {
        0 => None,
        1 => Some(Readable::read(reader)?),
        _ => return Err(DecodeError::InvalidValue),
    };
    Ok(res)
}

/// Writes a set of 32 bytes values in increasing order. Unlike vectors the
/// number of elements is not bounded.
pub fn write_hash_set<W: Writer>(
    set: &BTreeSet<[u8; 32]>,
    writer: &mut W,
) -> Result<(), lightning::io::Error> {
    BigSize(set.len() as u64).write(writer)?;
    for hash in set {
        writer.write_all(hash)?;
    }
    Ok(())
}

/// Reads a set written with [`write_hash_set`], rejecting values that are not
/// in strictly increasing order.
pub fn read_hash_set<R: Read>(reader: &mut R) -> Result<BTreeSet<[u8; 32]>, DecodeError> {
    let len: BigSize = Readable::read(reader)?;
    let mut res = BTreeSet::new();
    for _ in 0..len.0 {
        let hash: [u8; 32] = Readable::read(reader)?;
        if res.last().map_or(false, |last| *last >= hash) {
            return Err(DecodeError::InvalidValue);
        }
        res.insert(hash);
    }
    Ok(res)
}

fn write_consensus<W: Writer, T: Encodable>(t: &T, writer: &mut W) -> Result<(), lightning::io::Error> {
    let bytes = serialize(t);
    BigSize(bytes.len() as u64).write(writer)?;
    writer.write_all(&bytes)
}

fn read_consensus<R: Read, T: Decodable>(reader: &mut R) -> Result<T, DecodeError> {
    let len: BigSize = Readable::read(reader)?;
    if len.0 > MAX_VEC_SIZE {
        return Err(DecodeError::InvalidValue);
    }
    let mut buf = vec![0u8; len.0 as usize];
    reader.read_exact(&mut buf)?;
    deserialize(&buf).map_err(|_| DecodeError::InvalidValue)
}

/// Writes a [`Transaction`] using its consensus encoding.
pub fn write_transaction<W: Writer>(
    tx: &Transaction,
    writer: &mut W,
) -> Result<(), lightning::io::Error> {
    write_consensus(tx, writer)
}

/// Reads a [`Transaction`] written with [`write_transaction`].
pub fn read_transaction<R: Read>(reader: &mut R) -> Result<Transaction, DecodeError> {
    read_consensus(reader)
}

/// Writes a [`Script`].
pub fn write_script<W: Writer>(script: &Script, writer: &mut W) -> Result<(), lightning::io::Error> {
    write_consensus(script, writer)
}

/// Reads a [`Script`] written with [`write_script`].
pub fn read_script<R: Read>(reader: &mut R) -> Result<Script, DecodeError> {
    read_consensus(reader)
}

/// Writes an [`OutPoint`].
pub fn write_outpoint<W: Writer>(
    outpoint: &OutPoint,
    writer: &mut W,
) -> Result<(), lightning::io::Error> {
    write_consensus(outpoint, writer)
}

/// Reads an [`OutPoint`] written with [`write_outpoint`].
pub fn read_outpoint<R: Read>(reader: &mut R) -> Result<OutPoint, DecodeError> {
    read_consensus(reader)
}

/// Writes a [`Txid`].
pub fn write_txid<W: Writer>(txid: &Txid, writer: &mut W) -> Result<(), lightning::io::Error> {
    write_consensus(txid, writer)
}

/// Reads a [`Txid`] written with [`write_txid`].
pub fn read_txid<R: Read>(reader: &mut R) -> Result<Txid, DecodeError> {
    read_consensus(reader)
}

/// Writes a [`CommitmentScheme`].
pub fn write_commitment_scheme<W: Writer>(
    scheme: &CommitmentScheme,
    writer: &mut W,
) -> Result<(), lightning::io::Error> {
    match scheme {
        CommitmentScheme::RevocableTimeout { csv_delay } => {
            0_u8.write(writer)?;
            csv_delay.write(writer)
        }
        CommitmentScheme::AbsoluteTimeout {
            refund_height,
            reserve,
        } => {
            1_u8.write(writer)?;
            refund_height.write(writer)?;
            reserve.write(writer)
        }
    }
}

/// Reads a [`CommitmentScheme`].
pub fn read_commitment_scheme<R: Read>(reader: &mut R) -> Result<CommitmentScheme, DecodeError> {
    let id: u8 = Readable::read(reader)?;
    match id {
        0 => Ok(CommitmentScheme::RevocableTimeout {
            csv_delay: Readable::read(reader)?,
        }),
        1 => Ok(CommitmentScheme::AbsoluteTimeout {
            refund_height: Readable::read(reader)?,
            reserve: Readable::read(reader)?,
        }),
        _ => Err(DecodeError::UnknownRequiredFeature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightning::io::Cursor;

    #[test]
    fn hash_set_larger_than_vec_limit_is_read_back() {
        let set: BTreeSet<[u8; 32]> = (0..MAX_VEC_SIZE + 1)
            .map(|i| {
                let mut hash = [0u8; 32];
                hash[..8].copy_from_slice(&i.to_be_bytes());
                hash
            })
            .collect();
        let mut buf = Vec::new();
        write_hash_set(&set, &mut buf).unwrap();

        let read = read_hash_set(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read.len() as u64, MAX_VEC_SIZE + 1);
        assert_eq!(read, set);
    }

    #[test]
    fn hash_set_out_of_order_is_rejected() {
        let mut buf = Vec::new();
        BigSize(2).write(&mut buf).unwrap();
        buf.extend_from_slice(&[2u8; 32]);
        buf.extend_from_slice(&[1u8; 32]);
        assert!(matches!(
            read_hash_set(&mut Cursor::new(&buf)),
            Err(DecodeError::InvalidValue)
        ));
    }

    #[test]
    fn big_size_rejects_non_canonical_encoding() {
        let mut cursor = Cursor::new(vec![0xFDu8, 0x00, 0x10]);
        assert!(matches!(
            BigSize::read(&mut cursor),
            Err(DecodeError::InvalidValue)
        ));
    }

    #[test]
    fn commitment_scheme_serialization() {
        let scheme = CommitmentScheme::AbsoluteTimeout {
            refund_height: 800_000,
            reserve: 5_000,
        };
        let mut buf = Vec::new();
        write_commitment_scheme(&scheme, &mut buf).unwrap();
        let read = read_commitment_scheme(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(scheme, read);

        let mut buf = vec![7u8];
        buf.extend_from_slice(&[0u8; 4]);
        assert!(read_commitment_scheme(&mut Cursor::new(&buf)).is_err());
    }
}
