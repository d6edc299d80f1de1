//! Wrapper around a loaded GL context: debug output, implementation limits,
//! extension queries.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::rc::Rc;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;

//--------------------------------------------------------------------------------------------------
extern "system" fn debug_callback(
    _source: GLenum,
    _ty: GLenum,
    _id: GLuint,
    severity: GLenum,
    length: GLsizei,
    msg: *const GLchar,
    _data: *mut c_void,
) {
    let str = unsafe {
        ::std::str::from_utf8(::std::slice::from_raw_parts(msg as *const u8, length as usize))
            .unwrap_or("<invalid utf-8 in GL debug message>")
    };
    let level = match severity {
        gl::DEBUG_SEVERITY_HIGH => log::Level::Error,
        gl::DEBUG_SEVERITY_MEDIUM => log::Level::Warn,
        gl::DEBUG_SEVERITY_LOW => log::Level::Info,
        _ => log::Level::Debug,
    };
    log!(level, "(GL) {}", str);
}

//--------------------------------------------------------------------------------------------------
pub struct ImplementationParameters {
    pub max_draw_buffers: u32,
    pub max_color_attachments: u32,
    pub max_compute_work_group_count: u32,
}

impl ImplementationParameters {
    pub fn populate(gl: &Gl) -> ImplementationParameters {
        let getint = |param| unsafe {
            let mut v = 0;
            gl.GetIntegerv(param, &mut v);
            v
        };
        let getint_i = |param, index| unsafe {
            let mut v = 0;
            gl.GetIntegeri_v(param, index, &mut v);
            v
        };

        ImplementationParameters {
            max_draw_buffers: getint(gl::MAX_DRAW_BUFFERS) as u32,
            max_color_attachments: getint(gl::MAX_COLOR_ATTACHMENTS) as u32,
            max_compute_work_group_count: getint_i(gl::MAX_COMPUTE_WORK_GROUP_COUNT, 0) as u32,
        }
    }
}

//--------------------------------------------------------------------------------------------------

/// Owns the loaded function pointers of a current GL context along with the
/// queried capabilities the renderer dispatches on.
pub struct GlCore {
    gl: Rc<Gl>,
    limits: ImplementationParameters,
    has_shader_subgroup: bool,
}

impl GlCore {
    /// Wraps an already loaded binding struct.
    ///
    /// Installs the synchronous debug callback and queries implementation
    /// limits. A GL 4.6 core context must be current on this thread.
    pub fn new(gl: Gl) -> GlCore {
        unsafe {
            gl.Enable(gl::DEBUG_OUTPUT);
            gl.Enable(gl::DEBUG_OUTPUT_SYNCHRONOUS);
            gl.DebugMessageCallback(Some(debug_callback), ptr::null());
            gl.DebugMessageControl(gl::DONT_CARE, gl::DONT_CARE, gl::DONT_CARE, 0, ptr::null(), 1);

            let mut major_version = 0;
            let mut minor_version = 0;
            gl.GetIntegerv(gl::MAJOR_VERSION, &mut major_version);
            gl.GetIntegerv(gl::MINOR_VERSION, &mut minor_version);

            let vendor = CStr::from_ptr(gl.GetString(gl::VENDOR) as *const c_char);
            let renderer = CStr::from_ptr(gl.GetString(gl::RENDERER) as *const c_char);

            debug!(
                "OpenGL version {}.{} (vendor: {:?}, renderer: {:?})",
                major_version, minor_version, vendor, renderer
            );
        }

        let limits = ImplementationParameters::populate(&gl);
        let has_shader_subgroup = extension_supported(&gl, "GL_KHR_shader_subgroup");
        if !has_shader_subgroup {
            info!("GL_KHR_shader_subgroup not available, radix sort will use the fallback sorter");
        }

        GlCore {
            gl: Rc::new(gl),
            limits,
            has_shader_subgroup,
        }
    }

    /// Loads the bindings through the context's `get_proc_address` and wraps
    /// them.
    pub fn load_with<F>(loadfn: F) -> GlCore
    where
        F: FnMut(&'static str) -> *const c_void,
    {
        GlCore::new(Gl::load_with(loadfn))
    }

    pub fn gl(&self) -> &Rc<Gl> {
        &self.gl
    }

    pub fn limits(&self) -> &ImplementationParameters {
        &self.limits
    }

    pub fn has_shader_subgroup(&self) -> bool {
        self.has_shader_subgroup
    }
}

fn extension_supported(gl: &Gl, name: &str) -> bool {
    unsafe {
        let mut count = 0;
        gl.GetIntegerv(gl::NUM_EXTENSIONS, &mut count);
        for i in 0..count.max(0) as u32 {
            let s = gl.GetStringi(gl::EXTENSIONS, i);
            if s.is_null() {
                continue;
            }
            if CStr::from_ptr(s as *const c_char).to_bytes() == name.as_bytes() {
                return true;
            }
        }
    }
    false
}

/// Drains the GL error queue, logging every entry with the stage label.
/// Returns true if any error was pending. Draw-time errors are reported this
/// way and the frame simply continues; nothing is rolled back.
pub(crate) fn check_gl_error(gl: &Gl, label: &str) -> bool {
    let mut seen = false;
    loop {
        let err = unsafe { gl.GetError() };
        if err == gl::NO_ERROR {
            break;
        }
        seen = true;
        error!("GL error {:#06x} at {}", err, label);
    }
    seen
}
