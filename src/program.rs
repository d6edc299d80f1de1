//! Shader program objects: compilation from GLSL files, `#define` block
//! injection, typed uniform setters.

use std::cell::RefCell;
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use fxhash::FxHashMap;
use nalgebra_glm as glm;
use regex::Regex;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::error::{Error, Result};

lazy_static! {
    static ref RE_VERSION: Regex = Regex::new(r#"(?m)^[ \t]*#version[^\n]*$"#).unwrap();
}

/// Splices the registered macro blocks into a GLSL source string.
///
/// GLSL requires `#version` to be the first directive, so the blocks land on
/// the line right after it; sources without a version line get the blocks
/// prepended. Blocks appear in registration order.
fn inject_macros(macros: &[(String, String)], source: &str) -> String {
    if macros.is_empty() {
        return source.to_owned();
    }
    let mut block = String::new();
    for (_, text) in macros {
        block.push_str(text);
        if !text.ends_with('\n') {
            block.push('\n');
        }
    }
    match RE_VERSION.find(source) {
        Some(m) => {
            let mut out = String::with_capacity(source.len() + block.len() + 1);
            out.push_str(&source[..m.end()]);
            out.push('\n');
            out.push_str(&block);
            out.push_str(source[m.end()..].trim_start_matches('\n'));
            out
        }
        None => {
            let mut out = block;
            out.push_str(source);
            out
        }
    }
}

fn shader_info_log(gl: &Gl, obj: GLuint) -> String {
    unsafe {
        let mut log_size = 0;
        gl.GetShaderiv(obj, gl::INFO_LOG_LENGTH, &mut log_size);
        let mut log_buf = vec![0u8; log_size.max(1) as usize];
        let mut written = 0;
        gl.GetShaderInfoLog(
            obj,
            log_buf.len() as GLsizei,
            &mut written,
            log_buf.as_mut_ptr() as *mut GLchar,
        );
        log_buf.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&log_buf).into_owned()
    }
}

fn program_info_log(gl: &Gl, obj: GLuint) -> String {
    unsafe {
        let mut log_size = 0;
        gl.GetProgramiv(obj, gl::INFO_LOG_LENGTH, &mut log_size);
        let mut log_buf = vec![0u8; log_size.max(1) as usize];
        let mut written = 0;
        gl.GetProgramInfoLog(
            obj,
            log_buf.len() as GLsizei,
            &mut written,
            log_buf.as_mut_ptr() as *mut GLchar,
        );
        log_buf.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&log_buf).into_owned()
    }
}

fn create_shader_from_glsl(gl: &Gl, stage: GLenum, source: &str, path: &Path) -> Result<GLuint> {
    unsafe {
        let obj = gl.CreateShader(stage);
        let sources = [source.as_ptr() as *const GLchar];
        let lengths = [source.len() as GLint];
        gl.ShaderSource(obj, 1, sources.as_ptr(), lengths.as_ptr());
        gl.CompileShader(obj);
        let mut status = 0;
        gl.GetShaderiv(obj, gl::COMPILE_STATUS, &mut status);
        if status != gl::TRUE as GLint {
            let log = shader_info_log(gl, obj);
            gl.DeleteShader(obj);
            Err(Error::ShaderCompile {
                path: path.to_owned(),
                log,
            })
        } else {
            Ok(obj)
        }
    }
}

/// An owning handle to a linked program object.
///
/// A `Program` starts out empty; `add_macro` registers `#define` blocks that
/// every subsequent `load_*` splices into the sources before compiling.
pub struct Program {
    gl: Rc<Gl>,
    obj: GLuint,
    macros: Vec<(String, String)>,
    uniform_locations: RefCell<FxHashMap<String, GLint>>,
}

impl Program {
    pub fn new(gl: &Rc<Gl>) -> Program {
        Program {
            gl: gl.clone(),
            obj: 0,
            macros: Vec::new(),
            uniform_locations: RefCell::new(FxHashMap::default()),
        }
    }

    /// Registers a named `#define` block. Re-registering a name replaces its
    /// text.
    pub fn add_macro(&mut self, name: &str, text: &str) {
        if let Some(entry) = self.macros.iter_mut().find(|(n, _)| n == name) {
            entry.1 = text.to_owned();
        } else {
            self.macros.push((name.to_owned(), text.to_owned()));
        }
    }

    pub fn load_vert_frag(
        &mut self,
        vert_path: impl AsRef<Path>,
        frag_path: impl AsRef<Path>,
    ) -> Result<()> {
        let vs = self.compile_stage(gl::VERTEX_SHADER, vert_path.as_ref())?;
        let fs = match self.compile_stage(gl::FRAGMENT_SHADER, frag_path.as_ref()) {
            Ok(fs) => fs,
            Err(e) => {
                unsafe { self.gl.DeleteShader(vs) };
                return Err(e);
            }
        };
        self.link(&[vs, fs])
    }

    pub fn load_vert_geom_frag(
        &mut self,
        vert_path: impl AsRef<Path>,
        geom_path: impl AsRef<Path>,
        frag_path: impl AsRef<Path>,
    ) -> Result<()> {
        let mut shaders = Vec::with_capacity(3);
        for &(stage, path) in &[
            (gl::VERTEX_SHADER, vert_path.as_ref()),
            (gl::GEOMETRY_SHADER, geom_path.as_ref()),
            (gl::FRAGMENT_SHADER, frag_path.as_ref()),
        ] {
            match self.compile_stage(stage, path) {
                Ok(obj) => shaders.push(obj),
                Err(e) => {
                    for &s in &shaders {
                        unsafe { self.gl.DeleteShader(s) };
                    }
                    return Err(e);
                }
            }
        }
        self.link(&shaders)
    }

    pub fn load_compute(&mut self, comp_path: impl AsRef<Path>) -> Result<()> {
        let cs = self.compile_stage(gl::COMPUTE_SHADER, comp_path.as_ref())?;
        self.link(&[cs])
    }

    fn compile_stage(&self, stage: GLenum, path: &Path) -> Result<GLuint> {
        let source = fs::read_to_string(path).map_err(|error| Error::ShaderIo {
            path: PathBuf::from(path),
            error,
        })?;
        let source = inject_macros(&self.macros, &source);
        create_shader_from_glsl(&self.gl, stage, &source, path)
    }

    fn link(&mut self, shaders: &[GLuint]) -> Result<()> {
        unsafe {
            let obj = self.gl.CreateProgram();
            for &s in shaders {
                self.gl.AttachShader(obj, s);
            }
            self.gl.LinkProgram(obj);
            for &s in shaders {
                self.gl.DetachShader(obj, s);
                self.gl.DeleteShader(s);
            }
            let mut status = 0;
            self.gl.GetProgramiv(obj, gl::LINK_STATUS, &mut status);
            if status != gl::TRUE as GLint {
                let log = program_info_log(&self.gl, obj);
                self.gl.DeleteProgram(obj);
                return Err(Error::ProgramLink { log });
            }
            if self.obj != 0 {
                self.gl.DeleteProgram(self.obj);
            }
            self.obj = obj;
        }
        self.uniform_locations.borrow_mut().clear();
        Ok(())
    }

    pub fn obj(&self) -> GLuint {
        self.obj
    }

    pub fn bind(&self) {
        unsafe {
            self.gl.UseProgram(self.obj);
        }
    }

    /// Sets a uniform by name. Uniforms the linker discarded resolve to
    /// location -1, which the GL silently ignores.
    pub fn set_uniform<T: UniformValue>(&self, name: &str, value: T) {
        let location = self.uniform_location(name);
        value.apply(&self.gl, self.obj, location);
    }

    fn uniform_location(&self, name: &str) -> GLint {
        if let Some(&loc) = self.uniform_locations.borrow().get(name) {
            return loc;
        }
        let cname = CString::new(name).expect("uniform name contains NUL");
        let loc = unsafe { self.gl.GetUniformLocation(self.obj, cname.as_ptr()) };
        self.uniform_locations
            .borrow_mut()
            .insert(name.to_owned(), loc);
        loc
    }

    /// Looks up a vertex attribute location; -1 when the attribute is not an
    /// active input of the program.
    pub fn attrib_location(&self, name: &str) -> GLint {
        let cname = CString::new(name).expect("attribute name contains NUL");
        unsafe { self.gl.GetAttribLocation(self.obj, cname.as_ptr()) }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe {
            self.gl.DeleteProgram(self.obj);
        }
    }
}

/// A value kind that can be uploaded to a program uniform.
pub trait UniformValue {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint);
}

impl UniformValue for f32 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform1f(program, location, *self) }
    }
}

impl UniformValue for i32 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform1i(program, location, *self) }
    }
}

impl UniformValue for u32 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform1ui(program, location, *self) }
    }
}

impl UniformValue for bool {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform1i(program, location, *self as GLint) }
    }
}

impl UniformValue for glm::Vec2 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform2fv(program, location, 1, self.as_slice().as_ptr()) }
    }
}

impl UniformValue for glm::Vec3 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform3fv(program, location, 1, self.as_slice().as_ptr()) }
    }
}

impl UniformValue for glm::Vec4 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe { gl.ProgramUniform4fv(program, location, 1, self.as_slice().as_ptr()) }
    }
}

impl UniformValue for glm::Mat4 {
    fn apply(&self, gl: &Gl, program: GLuint, location: GLint) {
        unsafe {
            gl.ProgramUniformMatrix4fv(program, location, 1, gl::FALSE, self.as_slice().as_ptr())
        }
    }
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    fn defines(blocks: &[(&str, &str)]) -> Vec<(String, String)> {
        blocks
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_inject_after_version() {
        let src = "#version 460\nvoid main() {}\n";
        let m = defines(&[("DEFINES", "#define FULL_SH\n")]);
        let out = inject_macros(&m, src);
        assert_eq!(out, "#version 460\n#define FULL_SH\nvoid main() {}\n");
    }

    #[test]
    fn test_inject_without_version() {
        let src = "void main() {}\n";
        let m = defines(&[("DEFINES", "#define FRAMEBUFFER_SRGB\n")]);
        let out = inject_macros(&m, src);
        assert_eq!(out, "#define FRAMEBUFFER_SRGB\nvoid main() {}\n");
    }

    #[test]
    fn test_inject_multiple_blocks_in_order() {
        let src = "#version 450 core\nvoid main() {}\n";
        let m = defines(&[("A", "#define A 1"), ("B", "#define B 2\n")]);
        let out = inject_macros(&m, src);
        assert_eq!(
            out,
            "#version 450 core\n#define A 1\n#define B 2\nvoid main() {}\n"
        );
    }

    #[test]
    fn test_inject_no_macros_is_identity() {
        let src = "#version 460\nvoid main() {}\n";
        assert_eq!(inject_macros(&[], src), src);
    }

    #[test]
    fn test_version_mid_file_is_ignored() {
        // only a line-leading #version counts
        let src = "// #version comment\nvoid main() {}\n";
        let m = defines(&[("D", "#define X\n")]);
        let out = inject_macros(&m, src);
        assert!(out.starts_with("#define X\n"));
    }
}
