//! Engine implementation over the native library's C ABI.
//!
//! Every pointer returned by the library is owned by exactly one Rust value and
//! released exactly once from that value's `Drop`.

use super::{Engine, NativeError, NativeErrorKind, NativeQuery, Source};
use crate::term::{Bindings, QueryEvent, Term};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use tracing::{debug, warn};

#[allow(non_camel_case_types)]
mod sys {
    use std::os::raw::{c_char, c_int};

    #[repr(C)]
    pub struct Polar {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct Query {
        _private: [u8; 0],
    }

    pub const POLAR_SUCCESS: c_int = 1;

    #[link(name = "polar")]
    extern "C" {
        pub fn polar_new() -> *mut Polar;
        pub fn polar_free(polar: *mut Polar) -> c_int;
        pub fn polar_load(polar: *mut Polar, sources: *const c_char) -> c_int;
        pub fn polar_clear_rules(polar: *mut Polar) -> c_int;
        pub fn polar_register_constant(
            polar: *mut Polar,
            name: *const c_char,
            value: *const c_char,
        ) -> c_int;
        pub fn polar_get_external_id(polar: *mut Polar) -> u64;
        pub fn polar_new_query_from_term(
            polar: *mut Polar,
            query_term: *const c_char,
            trace: c_int,
        ) -> *mut Query;
        pub fn polar_new_query(polar: *mut Polar, query_str: *const c_char, trace: c_int)
            -> *mut Query;
        pub fn polar_bind(query: *mut Query, name: *const c_char, value: *const c_char) -> c_int;
        pub fn polar_next_query_event(query: *mut Query) -> *mut c_char;
        pub fn polar_call_result(query: *mut Query, call_id: u64, value: *const c_char) -> c_int;
        pub fn polar_application_error(query: *mut Query, message: *const c_char) -> c_int;
        pub fn query_free(query: *mut Query) -> c_int;
        pub fn string_free(s: *mut c_char) -> c_int;
        pub fn polar_get_error() -> *mut c_char;
    }
}

/// A string allocated by the library. Freed with `string_free` on drop.
struct NativeString {
    ptr: *mut c_char,
}

impl NativeString {
    /// Take ownership of a library string. Returns `None` for null.
    ///
    /// # Safety
    /// `ptr` must be null or a string returned by the library that nothing else frees.
    unsafe fn from_raw(ptr: *mut c_char) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self { ptr })
        }
    }

    fn to_string_lossy(&self) -> String {
        unsafe { CStr::from_ptr(self.ptr) }.to_string_lossy().into_owned()
    }
}

impl Drop for NativeString {
    fn drop(&mut self) {
        unsafe {
            sys::string_free(self.ptr);
        }
    }
}

/// Fetch and clear the library's thread-local error.
fn last_error() -> NativeError {
    match unsafe { NativeString::from_raw(sys::polar_get_error()) } {
        Some(payload) => NativeError::from_json(&payload.to_string_lossy()),
        None => NativeError::new(
            NativeErrorKind::Unknown("missing".into()),
            "native call failed without error details",
        ),
    }
}

fn check(code: i32) -> Result<(), NativeError> {
    if code == sys::POLAR_SUCCESS {
        Ok(())
    } else {
        Err(last_error())
    }
}

fn c_string(value: &str) -> Result<CString, NativeError> {
    CString::new(value).map_err(|e| {
        NativeError::new(
            NativeErrorKind::Unknown("Encoding".into()),
            format!("string contains an interior NUL byte: {}", e),
        )
    })
}

fn c_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<CString, NativeError> {
    let json = serde_json::to_string(value).map_err(|e| {
        NativeError::new(
            NativeErrorKind::Unknown("Encoding".into()),
            format!("failed to serialize for the engine: {}", e),
        )
    })?;
    c_string(&json)
}

/// Handle to a loaded native engine.
pub struct NativeEngine {
    polar: *mut sys::Polar,
}

// The library guards its knowledge base internally and supports concurrent queries.
unsafe impl Send for NativeEngine {}
unsafe impl Sync for NativeEngine {}

impl NativeEngine {
    /// Create an empty engine.
    pub fn new() -> Result<Self, NativeError> {
        let polar = unsafe { sys::polar_new() };
        if polar.is_null() {
            return Err(last_error());
        }
        Ok(Self { polar })
    }

    fn start_query(
        &self,
        query: *mut sys::Query,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError> {
        if query.is_null() {
            return Err(last_error());
        }
        // Owned from here on, so an early return below still frees it.
        let handle = NativeQueryHandle { query };
        for (name, value) in bindings {
            let name = c_string(name.as_str())?;
            let value = c_json(value)?;
            check(unsafe { sys::polar_bind(handle.query, name.as_ptr(), value.as_ptr()) })?;
        }
        debug!(bindings = bindings.len(), "native query created");
        Ok(Box::new(handle))
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        unsafe {
            sys::polar_free(self.polar);
        }
    }
}

impl Engine for NativeEngine {
    fn load(&self, sources: &[Source]) -> Result<(), NativeError> {
        let sources = c_json(sources)?;
        check(unsafe { sys::polar_load(self.polar, sources.as_ptr()) })
    }

    fn clear_rules(&self) -> Result<(), NativeError> {
        check(unsafe { sys::polar_clear_rules(self.polar) })
    }

    fn register_constant(&self, name: &str, value: &Term) -> Result<(), NativeError> {
        let name = c_string(name)?;
        let value = c_json(value)?;
        check(unsafe { sys::polar_register_constant(self.polar, name.as_ptr(), value.as_ptr()) })
    }

    fn new_instance_id(&self) -> u64 {
        unsafe { sys::polar_get_external_id(self.polar) }
    }

    fn new_query(
        &self,
        query: &Term,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError> {
        let term = c_json(query)?;
        let ptr = unsafe { sys::polar_new_query_from_term(self.polar, term.as_ptr(), 0) };
        self.start_query(ptr, bindings)
    }

    fn new_query_from_str(
        &self,
        query: &str,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError> {
        let src = c_string(query)?;
        let ptr = unsafe { sys::polar_new_query(self.polar, src.as_ptr(), 0) };
        self.start_query(ptr, bindings)
    }
}

/// A native query pointer, freed at most once.
struct NativeQueryHandle {
    query: *mut sys::Query,
}

// Queries are single-owner; `&mut self` on every call keeps them on one thread at a time.
unsafe impl Send for NativeQueryHandle {}

impl NativeQueryHandle {
    fn live(&self) -> Result<*mut sys::Query, NativeError> {
        if self.query.is_null() {
            Err(NativeError::new(
                NativeErrorKind::Unknown("Freed".into()),
                "query used after it was freed",
            ))
        } else {
            Ok(self.query)
        }
    }
}

impl NativeQuery for NativeQueryHandle {
    fn next_event(&mut self) -> Result<QueryEvent, NativeError> {
        let query = self.live()?;
        let payload = match unsafe { NativeString::from_raw(sys::polar_next_query_event(query)) } {
            Some(payload) => payload,
            None => return Err(last_error()),
        };
        let json = payload.to_string_lossy();
        serde_json::from_str(&json).map_err(|e| {
            NativeError::new(
                NativeErrorKind::Unknown("MalformedEvent".into()),
                format!("could not decode event {}: {}", json, e),
            )
        })
    }

    fn answer_call(&mut self, call_id: u64, result: Option<&Term>) -> Result<(), NativeError> {
        let query = self.live()?;
        let value = c_json(&result)?;
        check(unsafe { sys::polar_call_result(query, call_id, value.as_ptr()) })
    }

    fn answer_application_error(&mut self, message: &str) -> Result<(), NativeError> {
        let query = self.live()?;
        let message = c_string(message)?;
        check(unsafe { sys::polar_application_error(query, message.as_ptr()) })
    }

    fn free(&mut self) {
        if self.query.is_null() {
            return;
        }
        let code = unsafe { sys::query_free(self.query) };
        if code != sys::POLAR_SUCCESS {
            warn!(error = %last_error(), "native query free reported failure");
        }
        self.query = std::ptr::null_mut();
    }
}

impl Drop for NativeQueryHandle {
    fn drop(&mut self) {
        self.free();
    }
}
