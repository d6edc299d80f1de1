//! Wrapper around 2D texture objects.

use std::rc::Rc;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wrap {
    ClampToEdge,
    Repeat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureParams {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub s_wrap: Wrap,
    pub t_wrap: Wrap,
}

impl Default for TextureParams {
    fn default() -> TextureParams {
        TextureParams {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            s_wrap: Wrap::ClampToEdge,
            t_wrap: Wrap::ClampToEdge,
        }
    }
}

impl TextureParams {
    /// Point-sampled, clamped params used by every temporal history target.
    pub fn nearest_clamped() -> TextureParams {
        TextureParams {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            s_wrap: Wrap::ClampToEdge,
            t_wrap: Wrap::ClampToEdge,
        }
    }
}

fn filter_to_glenum(filter: Filter) -> GLenum {
    match filter {
        Filter::Nearest => gl::NEAREST,
        Filter::Linear => gl::LINEAR,
    }
}

fn wrap_to_glenum(wrap: Wrap) -> GLenum {
    match wrap {
        Wrap::ClampToEdge => gl::CLAMP_TO_EDGE,
        Wrap::Repeat => gl::REPEAT,
    }
}

/// An owning handle to an immutable-storage 2D texture.
pub struct Texture {
    gl: Rc<Gl>,
    obj: GLuint,
    width: i32,
    height: i32,
    format: GLenum,
    ty: GLenum,
}

impl Texture {
    pub fn new(
        gl: &Rc<Gl>,
        width: i32,
        height: i32,
        internal_format: GLenum,
        format: GLenum,
        ty: GLenum,
        params: &TextureParams,
    ) -> Texture {
        assert!(width > 0 && height > 0, "texture dimensions must be positive");
        let mut obj: GLuint = 0;
        unsafe {
            gl.CreateTextures(gl::TEXTURE_2D, 1, &mut obj);
            gl.TextureStorage2D(obj, 1, internal_format, width, height);
            gl.TextureParameteri(
                obj,
                gl::TEXTURE_MAG_FILTER,
                filter_to_glenum(params.mag_filter) as GLint,
            );
            gl.TextureParameteri(
                obj,
                gl::TEXTURE_MIN_FILTER,
                filter_to_glenum(params.min_filter) as GLint,
            );
            gl.TextureParameteri(
                obj,
                gl::TEXTURE_WRAP_S,
                wrap_to_glenum(params.s_wrap) as GLint,
            );
            gl.TextureParameteri(
                obj,
                gl::TEXTURE_WRAP_T,
                wrap_to_glenum(params.t_wrap) as GLint,
            );
        }
        Texture {
            gl: gl.clone(),
            obj,
            width,
            height,
            format,
            ty,
        }
    }

    pub fn obj(&self) -> GLuint {
        self.obj
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Clears every texel to zero through the API-level clear.
    pub fn clear_to_zero(&self) {
        const ZEROS: [f32; 4] = [0.0; 4];
        unsafe {
            self.gl.ClearTexImage(
                self.obj,
                0,
                self.format,
                self.ty,
                ZEROS.as_ptr() as *const GLvoid,
            );
        }
    }

    /// Binds the texture to a sampler unit.
    pub fn bind_to_unit(&self, unit: GLuint) {
        unsafe {
            self.gl.BindTextureUnit(unit, self.obj);
        }
    }

    /// Binds level 0 as a write-only image unit for store operations.
    pub fn bind_image_write(&self, unit: GLuint, internal_format: GLenum) {
        unsafe {
            self.gl.BindImageTexture(
                unit,
                self.obj,
                0,
                gl::FALSE,
                0,
                gl::WRITE_ONLY,
                internal_format,
            );
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.gl.DeleteTextures(1, &self.obj);
        }
    }
}
