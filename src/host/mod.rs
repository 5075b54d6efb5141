//! Host-side data: values, class descriptors, the instance registry and the
//! marshaler that converts between host values and engine terms.

mod class;
mod marshal;
mod registry;
mod value;

pub use class::{Class, ClassBuilder, HostIter};
pub use marshal::Marshaler;
pub use registry::{IdSource, Owner, Registry};
pub use value::{Args, FromHostValue, HostValue, Instance, IntoHostValue};
