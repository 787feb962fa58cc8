/// Typed 64-bit entity identifiers.
///
/// - **Layout** ([`id::EntityId`]): type tag, audio-type sub-tag, primary
///   and secondary sequence numbers
/// - **Textual forms**: BS.2076 prefixes (`AO_`, `APR_`, `AC_`, ...)
pub mod id;

/// Value types: gain, position, time, names.
pub mod types;

/// Entity header and tagged-union bodies.
pub mod entity;

/// The entity-relation store.
pub mod model;
