//! Wrapper around vertex array objects.

use std::rc::Rc;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::buffer::BufferObject;

pub struct VertexArrayObject {
    gl: Rc<Gl>,
    obj: GLuint,
    element_buffer: Option<Rc<BufferObject>>,
}

impl VertexArrayObject {
    pub fn new(gl: &Rc<Gl>) -> VertexArrayObject {
        let mut obj: GLuint = 0;
        unsafe {
            gl.CreateVertexArrays(1, &mut obj);
        }
        VertexArrayObject {
            gl: gl.clone(),
            obj,
            element_buffer: None,
        }
    }

    pub fn obj(&self) -> GLuint {
        self.obj
    }

    pub fn bind(&self) {
        unsafe {
            self.gl.BindVertexArray(self.obj);
        }
    }

    pub fn unbind(&self) {
        unsafe {
            self.gl.BindVertexArray(0);
        }
    }

    /// Sources vertex data for a binding slot from `buffer` with the given
    /// start offset and record stride.
    pub fn attach_vertex_buffer(
        &self,
        binding: GLuint,
        buffer: &BufferObject,
        offset: usize,
        stride: usize,
    ) {
        unsafe {
            self.gl.VertexArrayVertexBuffer(
                self.obj,
                binding,
                buffer.obj(),
                offset as GLintptr,
                stride as GLsizei,
            );
        }
    }

    /// Enables a float attribute sourced from a binding slot, with
    /// normalization off.
    pub fn set_float_attribute(
        &self,
        location: GLuint,
        binding: GLuint,
        components: GLint,
        relative_offset: GLuint,
    ) {
        unsafe {
            self.gl.EnableVertexArrayAttrib(self.obj, location);
            self.gl.VertexArrayAttribFormat(
                self.obj,
                location,
                components,
                gl::FLOAT,
                gl::FALSE,
                relative_offset,
            );
            self.gl.VertexArrayAttribBinding(self.obj, location, binding);
        }
    }

    /// Attaches the element buffer consumed by indexed draws. The buffer is
    /// shared so the sort stage can overwrite its prefix in place.
    pub fn set_element_buffer(&mut self, buffer: Rc<BufferObject>) {
        unsafe {
            self.gl.VertexArrayElementBuffer(self.obj, buffer.obj());
        }
        self.element_buffer = Some(buffer);
    }

    pub fn element_buffer(&self) -> Option<&Rc<BufferObject>> {
        self.element_buffer.as_ref()
    }
}

impl Drop for VertexArrayObject {
    fn drop(&mut self) {
        unsafe {
            self.gl.DeleteVertexArrays(1, &self.obj);
        }
    }
}
