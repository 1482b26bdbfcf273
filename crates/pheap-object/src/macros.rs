/// Implement `PartialEq`, `Eq`, `Hash`, `Display` and `Debug` for a
/// [`Persistent`](crate::Persistent) type by delegating to its fallible
/// structural operations.
///
/// A heap read that fails inside one of these impls is logged at `warn`;
/// the value then compares unequal, hashes as `0`, and renders as
/// `<unreadable>`.
macro_rules! structural_traits {
    ([$($gen:ident),*] $ty:ty) => {
        impl<$($gen: $crate::Persistent),*> PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                match $crate::Persistent::try_eq(self, other) {
                    Ok(equal) => equal,
                    Err(error) => {
                        ::tracing::warn!(%error, "equality check could not read the heap");
                        false
                    }
                }
            }
        }

        impl<$($gen: $crate::Persistent),*> Eq for $ty {}

        impl<$($gen: $crate::Persistent),*> ::std::hash::Hash for $ty {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                let hash = $crate::Persistent::try_hash(self).unwrap_or_else(|error| {
                    ::tracing::warn!(%error, "hash could not read the heap");
                    0
                });
                state.write_u64(hash);
            }
        }

        impl<$($gen: $crate::Persistent),*> ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match $crate::Persistent::try_render(self) {
                    Ok(text) => f.write_str(&text),
                    Err(error) => {
                        ::tracing::warn!(%error, "render could not read the heap");
                        f.write_str("<unreadable>")
                    }
                }
            }
        }

        impl<$($gen: $crate::Persistent),*> ::std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let object = $crate::Persistent::object(self);
                f.debug_struct(stringify!($ty))
                    .field("handle", &object.handle())
                    .field("heap", &object.heap_id())
                    .finish()
            }
        }
    };
}
