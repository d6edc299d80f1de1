//! Wrapper around OpenGL framebuffers.
//!
//! Attachments are held as `Rc<Texture>`: per-eye scene targets and the
//! accumulation FBO share textures with the fullscreen passes, and dropping
//! a framebuffer must never destroy a texture another consumer still
//! references.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::texture::Texture;

pub struct FrameBuffer {
    gl: Rc<Gl>,
    obj: GLuint,
    color: SmallVec<[Option<Rc<Texture>>; 2]>,
    depth: Option<Rc<Texture>>,
    stencil: Option<Rc<Texture>>,
}

impl FrameBuffer {
    pub fn new(gl: &Rc<Gl>) -> FrameBuffer {
        let mut obj: GLuint = 0;
        unsafe {
            gl.CreateFramebuffers(1, &mut obj);
        }
        FrameBuffer {
            gl: gl.clone(),
            obj,
            color: SmallVec::new(),
            depth: None,
            stencil: None,
        }
    }

    pub fn obj(&self) -> GLuint {
        self.obj
    }

    pub fn bind(&self) {
        unsafe {
            self.gl.BindFramebuffer(gl::FRAMEBUFFER, self.obj);
        }
    }

    /// Attaches `tex` to the given color slot, replacing any previous
    /// attachment in that slot.
    pub fn attach_color(&mut self, tex: Rc<Texture>, slot: u32) {
        unsafe {
            self.gl
                .NamedFramebufferTexture(self.obj, gl::COLOR_ATTACHMENT0 + slot, tex.obj(), 0);
        }
        let slot = slot as usize;
        if slot >= self.color.len() {
            self.color.resize(slot + 1, None);
        }
        self.color[slot] = Some(tex);
    }

    pub fn attach_depth(&mut self, tex: Rc<Texture>) {
        unsafe {
            self.gl
                .NamedFramebufferTexture(self.obj, gl::DEPTH_ATTACHMENT, tex.obj(), 0);
        }
        self.depth = Some(tex);
    }

    pub fn attach_stencil(&mut self, tex: Rc<Texture>) {
        unsafe {
            self.gl
                .NamedFramebufferTexture(self.obj, gl::STENCIL_ATTACHMENT, tex.obj(), 0);
        }
        self.stencil = Some(tex);
    }

    /// Enables the first `count` draw buffers, mapped to the color slots.
    pub fn set_draw_buffers(&self, count: u32) {
        assert!(count <= 8);
        let bufs: [GLenum; 8] = [
            gl::COLOR_ATTACHMENT0,
            gl::COLOR_ATTACHMENT0 + 1,
            gl::COLOR_ATTACHMENT0 + 2,
            gl::COLOR_ATTACHMENT0 + 3,
            gl::COLOR_ATTACHMENT0 + 4,
            gl::COLOR_ATTACHMENT0 + 5,
            gl::COLOR_ATTACHMENT0 + 6,
            gl::COLOR_ATTACHMENT0 + 7,
        ];
        unsafe {
            self.gl
                .NamedFramebufferDrawBuffers(self.obj, count as GLsizei, bufs.as_ptr());
        }
    }

    /// Queries the GPU-side completeness status for drawing.
    pub fn status(&self) -> GLenum {
        unsafe {
            self.gl
                .CheckNamedFramebufferStatus(self.obj, gl::DRAW_FRAMEBUFFER)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == gl::FRAMEBUFFER_COMPLETE
    }

    pub fn color_texture(&self, slot: u32) -> Option<&Rc<Texture>> {
        self.color.get(slot as usize).and_then(|t| t.as_ref())
    }

    pub fn depth_texture(&self) -> Option<&Rc<Texture>> {
        self.depth.as_ref()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        // attached textures outlive the FBO through their Rc handles
        unsafe {
            self.gl.DeleteFramebuffers(1, &self.obj);
        }
    }
}
