//! Set of macro to help implementing the [`lightning::util::ser::Writeable`] trait.

/// Writes a field to a writer.
#[macro_export]
macro_rules! field_write {
    ($stream: expr, $field: expr, writeable) => {
        $field.write($stream)?;
    };
    ($stream: expr, $field: expr, {cb_writeable, $w_cb: expr, $r_cb: expr}) => {
        $w_cb(&$field, $stream)?;
    };
    ($stream: expr, $field: expr, vec) => {
        $crate::ser_impls::write_vec(&$field, $stream)?;
    };
    ($stream: expr, $field: expr, usize) => {
        $crate::ser_impls::write_usize(&$field, $stream)?;
    };
    ($stream: expr, $field: expr, option) => {
        $crate::ser_impls::write_option(&$field, $stream)?;
    };
}

/// Reads a field from a reader.
#[macro_export]
macro_rules! field_read {
    ($stream: expr, writeable) => {
        Readable::read($stream)?
    };
    ($stream: expr, {cb_writeable, $w_cb: expr, $r_cb: expr}) => {
        $r_cb($stream)?
    };
    ($stream: expr, vec) => {
        $crate::ser_impls::read_vec($stream)?
    };
    ($stream: expr, usize) => {
        $crate::ser_impls::read_usize($stream)?
    };
    ($stream: expr, option) => {
        $crate::ser_impls::read_option($stream)?
    };
}

/// Implements the [`lightning::util::ser::Writeable`] and
/// [`lightning::util::ser::Readable`] traits for a struct available in this
/// crate, writing the fields in the order in which they are listed.
#[macro_export]
macro_rules! impl_writeable {
    ($st:ident, {$(($field: ident, $fieldty: tt)), *} ) => {
        impl Writeable for $st {
            fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::lightning::io::Error> {
                $(
                    field_write!(w, self.$field, $fieldty);
                )*
                Ok(())
            }
        }

        impl Readable for $st {
            fn read<R: ::lightning::io::Read>(r: &mut R) -> Result<Self, DecodeError> {
                Ok(Self {
                    $(
                        $field: field_read!(r, $fieldty),
                    )*
                })
            }
        }
    };
}

/// Implements the [`lightning::util::ser::Writeable`] and
/// [`lightning::util::ser::Readable`] traits for an enum, prefixing each
/// variant with a one byte identifier.
#[macro_export]
macro_rules! impl_writeable_enum {
    ($st:ident,
    $(($variant_id: expr, $variant_name: ident, {$(($field: ident, $fieldty: tt)),*})), *;
    $(($simple_variant_id: expr, $simple_variant_name: ident)), *) => {
        impl Writeable for $st {
            fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::lightning::io::Error> {
                match self {
                    $($st::$variant_name { $(ref $field),* } => {
                        let id : u8 = $variant_id;
                        id.write(w)?;
                        $(
                            field_write!(w, $field, $fieldty);
                        )*
                    }),*
                    $($st::$simple_variant_name => {
                        let id : u8 = $simple_variant_id;
                        id.write(w)?;
                    }),*
                };
                Ok(())
            }
        }

        impl Readable for $st {
            fn read<R: ::lightning::io::Read>(r: &mut R) -> Result<Self, DecodeError> {
                let id: u8 = Readable::read(r)?;
                match id {
                    $($variant_id => {
                        Ok($st::$variant_name {
                            $(
                                $field: field_read!(r, $fieldty)
                            ),*
                        })
                    }),*
                    $($simple_variant_id => {
                        Ok($st::$simple_variant_name)
                    }),*
                    _ => {
                        Err(DecodeError::UnknownRequiredFeature)
                    },
                }
            }
        }
    };
}
