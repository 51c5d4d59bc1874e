//! PDF writing: object serialization and incremental updates.
//!
//! ```text
//! PdfStructure (source)
//!     ↓
//! [IncrementalUpdate] (new/replaced objects + xref section + trailer)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! original bytes ++ update section
//! ```

mod incremental;
mod object_serializer;

pub use incremental::{IncrementalUpdate, ObjectPlacement, UpdatedDocument};
pub use object_serializer::ObjectSerializer;
