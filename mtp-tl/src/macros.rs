//! Declarative helpers that expand to the same shape the schema code generator
//! produces: a struct with public fields plus its wire impls.

/// Declare a constructor.
///
/// The default form serializes the constructor id before the fields; the
/// `bare` form omits it (for constructors only ever used inside bare vectors).
/// Deserialization always reads the bare body: the id has already been
/// consumed by whoever dispatched on it.
macro_rules! tl_type {
    (
        $(#[$meta:meta])*
        pub struct $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        tl_type!(@common $(#[$meta])* $name = $id { $( $(#[$fmeta])* $field : $ty ),* });

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $crate::Serializable::serialize(
                    &<Self as $crate::Identifiable>::CONSTRUCTOR_ID, buf,
                );
                $( $crate::Serializable::serialize(&self.$field, buf); )*
            }
        }
    };

    (
        $(#[$meta:meta])*
        bare struct $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        tl_type!(@common $(#[$meta])* $name = $id { $( $(#[$fmeta])* $field : $ty ),* });

        impl $crate::Serializable for $name {
            #[allow(unused_variables)]
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $( $crate::Serializable::serialize(&self.$field, buf); )*
            }
        }
    };

    (@common
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl $crate::Deserializable for $name {
            #[allow(unused_variables)]
            fn deserialize(
                buf: $crate::deserialize::Buffer,
            ) -> $crate::deserialize::Result<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::Deserializable>::deserialize(buf)?, )*
                })
            }
        }
    };
}

/// Declare an RPC function: a [`tl_type!`] plus its [`crate::RemoteCall`] impl.
macro_rules! tl_function {
    (
        $(#[$meta:meta])*
        pub struct $name:ident = $id:literal -> $ret:ty {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        tl_type! {
            $(#[$meta])*
            pub struct $name = $id {
                $( $(#[$fmeta])* pub $field : $ty ),*
            }
        }

        impl $crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}

/// Declare a boxed type: an enum over constructors, dispatching on the id.
macro_rules! tl_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident($ty:ty) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => $crate::Serializable::serialize(x, buf), )+
                }
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(
                buf: $crate::deserialize::Buffer,
            ) -> $crate::deserialize::Result<Self> {
                let id = <u32 as $crate::Deserializable>::deserialize(buf)?;
                $(
                    if id == <$ty as $crate::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(
                            <$ty as $crate::Deserializable>::deserialize(buf)?,
                        ));
                    }
                )+
                Err($crate::deserialize::Error::BadTypeId { id })
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self { Self::$variant(x) }
            }
        )+
    };
}
