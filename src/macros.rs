//! # Header Field Macros
//!
//! `SegmentMetaHeader` lives inside the memory-mapped `segment.meta` file and
//! stores every number as a zerocopy little-endian wrapper. These macros turn
//! those wrappers into plain `u32`/`u64` methods so the engine never touches
//! `U32`/`U64` directly.
//!
//! `zerocopy_accessors!` is for fields the engine rewrites in place (only the
//! segment size, updated on every `resize`); `zerocopy_getters!` is for fields
//! fixed at create time.
//!
//! ```ignore
//! impl SegmentMetaHeader {
//!     zerocopy_accessors! { segment_size: u64 }
//!     zerocopy_getters! { page_size: u32, capacity: u64 }
//! }
//!
//! header.set_segment_size(header.segment_size() + 4096);
//! ```

/// `name()` and `set_name()` for little-endian `u32`/`u64` header fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            $crate::zerocopy_getters!($field: $native_ty);

            ::paste::paste! {
                #[inline]
                pub fn [<set_ $field>](&mut self, val: $native_ty) {
                    self.$field.set(val);
                }
            }
        )*
    };
}

/// `name()` only, for header fields that never change after create.
#[macro_export]
macro_rules! zerocopy_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
