//! Wrapper around OpenGL buffer objects.

use std::mem;
use std::ptr;
use std::rc::Rc;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;

bitflags! {
    /// Storage flags forwarded to `glNamedBufferStorage`. Without
    /// `DYNAMIC_STORAGE` the buffer contents are immutable after creation.
    pub struct StorageFlags: GLbitfield {
        const DYNAMIC_STORAGE = gl::DYNAMIC_STORAGE_BIT;
        const MAP_READ = gl::MAP_READ_BIT;
    }
}

/// An owning handle to an immutable-storage buffer object.
pub struct BufferObject {
    gl: Rc<Gl>,
    obj: GLuint,
    target: GLenum,
    size: usize,
    flags: StorageFlags,
}

impl BufferObject {
    /// Creates a buffer with `data` as its initial contents.
    pub fn new(gl: &Rc<Gl>, target: GLenum, data: &[u8], flags: StorageFlags) -> BufferObject {
        let mut obj: GLuint = 0;
        unsafe {
            gl.CreateBuffers(1, &mut obj);
            if data.is_empty() {
                // zero-sized storage is INVALID_VALUE; an empty cloud still
                // gets a valid name
                gl.NamedBufferStorage(obj, 1, ptr::null(), flags.bits());
            } else {
                gl.NamedBufferStorage(
                    obj,
                    data.len() as GLsizeiptr,
                    data.as_ptr() as *const GLvoid,
                    flags.bits(),
                );
            }
        }
        BufferObject {
            gl: gl.clone(),
            obj,
            target,
            size: data.len(),
            flags,
        }
    }

    /// Creates an uninitialized buffer of `size` bytes.
    pub fn with_capacity(
        gl: &Rc<Gl>,
        target: GLenum,
        size: usize,
        flags: StorageFlags,
    ) -> BufferObject {
        let mut obj: GLuint = 0;
        unsafe {
            gl.CreateBuffers(1, &mut obj);
            gl.NamedBufferStorage(obj, size.max(1) as GLsizeiptr, ptr::null(), flags.bits());
        }
        BufferObject {
            gl: gl.clone(),
            obj,
            target,
            size,
            flags,
        }
    }

    /// Creates a buffer initialized from a slice of plain-old-data values.
    pub fn from_slice<T: Copy>(
        gl: &Rc<Gl>,
        target: GLenum,
        data: &[T],
        flags: StorageFlags,
    ) -> BufferObject {
        let bytes = unsafe {
            ::std::slice::from_raw_parts(data.as_ptr() as *const u8, mem::size_of_val(data))
        };
        BufferObject::new(gl, target, bytes, flags)
    }

    pub fn obj(&self) -> GLuint {
        self.obj
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bind(&self) {
        unsafe {
            self.gl.BindBuffer(self.target, self.obj);
        }
    }

    pub fn unbind(&self) {
        unsafe {
            self.gl.BindBuffer(self.target, 0);
        }
    }

    /// Binds the buffer to an indexed slot of its target (SSBO or atomic
    /// counter bindings).
    pub fn bind_base(&self, index: GLuint) {
        unsafe {
            self.gl.BindBufferBase(self.target, index, self.obj);
        }
    }

    /// Overwrites the buffer prefix with `data`. Requires `DYNAMIC_STORAGE`.
    pub fn update<T: Copy>(&self, data: &[T]) {
        assert!(
            self.flags.contains(StorageFlags::DYNAMIC_STORAGE),
            "update on a buffer created without DYNAMIC_STORAGE"
        );
        let byte_len = mem::size_of_val(data);
        assert!(byte_len <= self.size, "update overflows buffer storage");
        unsafe {
            self.gl.NamedBufferSubData(
                self.obj,
                0,
                byte_len as GLsizeiptr,
                data.as_ptr() as *const GLvoid,
            );
        }
    }

    /// Reads the buffer prefix back into `out` through a mapping. This is a
    /// synchronous GPU round-trip; requires `MAP_READ`.
    pub fn read_into<T: Copy>(&self, out: &mut [T]) {
        assert!(
            self.flags.contains(StorageFlags::MAP_READ),
            "read_into on a buffer created without MAP_READ"
        );
        let byte_len = mem::size_of_val(out);
        assert!(byte_len <= self.size, "read_into overflows buffer storage");
        if byte_len == 0 {
            return;
        }
        unsafe {
            let src =
                self.gl
                    .MapNamedBufferRange(self.obj, 0, byte_len as GLsizeiptr, gl::MAP_READ_BIT);
            assert!(!src.is_null(), "MapNamedBufferRange failed");
            ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr() as *mut u8, byte_len);
            self.gl.UnmapNamedBuffer(self.obj);
        }
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        unsafe {
            self.gl.DeleteBuffers(1, &self.obj);
        }
    }
}
