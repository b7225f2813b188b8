//! Typed Resource Handles
//!
//! A handle is an opaque 32-bit identity: the top 8 bits carry a
//! [`HandleType`] tag and the low 24 bits a dense index into the owning
//! manager's table. Handles own nothing; they are resolved against the manager
//! that minted them.
//!
//! The raw value `0` is invalid for every handle type. Since every real type
//! tag is non-zero, a minted handle can never be `0`, even for index `0`.
//!
//! Each resource kind gets its own newtype so a texture handle cannot be
//! passed where a buffer handle is expected. Handles rebuilt from raw values go
//! through [`TextureHandle::from_raw`] (and friends), which reject a mismatching
//! tag.

const INDEX_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Largest index a handle can encode.
pub const MAX_HANDLE_INDEX: u32 = INDEX_MASK;

/// Type tag stored in the top byte of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleType {
    None = 0,
    Texture = 1,
    ShaderLibrary = 2,
    Mesh = 3,
    ConstantBuffer = 4,
    Buffer = 5,
}

impl HandleType {
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Texture),
            2 => Some(Self::ShaderLibrary),
            3 => Some(Self::Mesh),
            4 => Some(Self::ConstantBuffer),
            5 => Some(Self::Buffer),
            _ => None,
        }
    }
}

/// Encodes a type tag and an index into a raw handle value.
///
/// # Panics
///
/// Panics if `index` does not fit in 24 bits.
#[inline]
#[must_use]
pub fn mint(handle_type: HandleType, index: u32) -> u32 {
    assert!(
        index <= INDEX_MASK,
        "handle index {index} does not fit in {INDEX_BITS} bits"
    );
    ((handle_type as u32) << INDEX_BITS) | index
}

/// Dense index stored in a raw handle value.
#[inline]
#[must_use]
pub fn index_of(raw: u32) -> u32 {
    raw & INDEX_MASK
}

/// Type tag stored in a raw handle value. Unknown tags map to `None`.
#[inline]
#[must_use]
pub fn type_of(raw: u32) -> Option<HandleType> {
    HandleType::from_tag((raw >> INDEX_BITS) as u8)
}

/// `true` iff the raw value is not the reserved `0`.
#[inline]
#[must_use]
pub fn is_valid(raw: u32) -> bool {
    raw != 0
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident => $tag:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Tag carried by every handle of this type.
            pub const TYPE: HandleType = $tag;

            /// The unset handle.
            pub const INVALID: Self = Self(0);

            /// Mints a handle for slot `index` of the owning table.
            #[inline]
            #[must_use]
            pub fn new(index: u32) -> Self {
                Self(mint(Self::TYPE, index))
            }

            /// Rebuilds a handle from its raw value, rejecting foreign tags.
            /// `0` is accepted and yields [`Self::INVALID`].
            #[must_use]
            pub fn from_raw(raw: u32) -> Option<Self> {
                if raw == 0 {
                    return Some(Self::INVALID);
                }
                (type_of(raw) == Some(Self::TYPE)).then_some(Self(raw))
            }

            #[inline]
            #[must_use]
            pub fn raw(self) -> u32 {
                self.0
            }

            /// Slot index in the owning table.
            ///
            /// # Panics
            ///
            /// Panics on the invalid handle or if the tag is not
            /// [`Self::TYPE`].
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                assert!(self.is_valid(), concat!("use of an invalid ", stringify!($name)));
                assert_eq!(
                    type_of(self.0),
                    Some(Self::TYPE),
                    concat!(stringify!($name), " carries a foreign type tag")
                );
                index_of(self.0) as usize
            }

            #[inline]
            #[must_use]
            pub fn is_valid(self) -> bool {
                is_valid(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

define_handle!(
    /// Handle to a texture owned by the texture manager.
    TextureHandle => HandleType::Texture
);
define_handle!(
    /// Handle to a shader library owned by the shader manager.
    LibraryHandle => HandleType::ShaderLibrary
);
define_handle!(
    /// Handle to mesh data owned by a mesh store.
    MeshHandle => HandleType::Mesh
);
define_handle!(
    /// Handle to a logical constant buffer owned by the constant buffer manager.
    ConstantBufferHandle => HandleType::ConstantBuffer
);
define_handle!(
    /// Handle to a sub-allocation owned by the GPU memory allocator.
    BufferHandle => HandleType::Buffer
);
