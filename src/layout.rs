//! Splat vertex layout: binds the cloud's interleaved bytes to the
//! attributes of the active splat program.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::buffer::{BufferObject, StorageFlags};
use crate::cloud::{AttributeType, GaussianCloud, SplatAttribute};
use crate::program::Program;
use crate::vao::VertexArrayObject;

/// One wired attribute: program location plus the slice of the record it
/// reads.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct AttributeBinding {
    pub location: GLint,
    pub components: GLint,
    pub offset: usize,
}

/// The attributes a cloud with the given SH arity feeds to the splat
/// program, in layout order.
pub(crate) fn attribute_set(full_sh: bool) -> SmallVec<[SplatAttribute; 16]> {
    SplatAttribute::all()
        .iter()
        .cloned()
        .filter(|a| full_sh || !a.requires_full_sh())
        .collect()
}

/// Resolves the attribute set against the cloud's offsets and a
/// name-to-location lookup (the program's active attributes).
pub(crate) fn resolve_bindings(
    cloud: &dyn GaussianCloud,
    lookup: impl Fn(&str) -> GLint,
) -> SmallVec<[AttributeBinding; 16]> {
    attribute_set(cloud.has_full_sh())
        .iter()
        .map(|&a| {
            let attr = cloud.attribute(a);
            assert_eq!(
                attr.ty,
                AttributeType::Float,
                "splat attribute {:?} must be float typed",
                a
            );
            AttributeBinding {
                location: lookup(a.shader_name()),
                components: a.components(),
                offset: attr.offset,
            }
        })
        .collect()
}

/// The GPU-side splat geometry: interleaved vertex data, the identity index
/// buffer, and the VAO tying both to the splat program's attributes.
pub(crate) struct SplatGeometry {
    pub vao: VertexArrayObject,
    pub index_buffer: Rc<BufferObject>,
    // the VAO references the buffer by name only; the handle keeps it alive
    _data_buffer: BufferObject,
}

pub(crate) fn build_splat_geometry(
    gl: &Rc<Gl>,
    cloud: &dyn GaussianCloud,
    program: &Program,
) -> SplatGeometry {
    let num_gaussians = cloud.num_gaussians();
    assert!(
        num_gaussians <= u32::max_value() as usize,
        "too many gaussians for 32-bit indices"
    );

    let data_buffer = BufferObject::new(
        gl,
        gl::ARRAY_BUFFER,
        cloud.raw_data(),
        StorageFlags::empty(),
    );

    let index_vec: Vec<u32> = (0..num_gaussians as u32).collect();
    let index_buffer = Rc::new(BufferObject::from_slice(
        gl,
        gl::ELEMENT_ARRAY_BUFFER,
        &index_vec,
        StorageFlags::DYNAMIC_STORAGE,
    ));

    let mut vao = VertexArrayObject::new(gl);
    vao.attach_vertex_buffer(0, &data_buffer, 0, cloud.stride());
    for binding in resolve_bindings(cloud, |name| program.attrib_location(name)) {
        if binding.location < 0 {
            debug!("splat program has no active attribute at offset {}", binding.offset);
            continue;
        }
        vao.set_float_attribute(
            binding.location as GLuint,
            0,
            binding.components,
            binding.offset as GLuint,
        );
    }
    vao.set_element_buffer(index_buffer.clone());

    SplatGeometry {
        vao,
        index_buffer,
        _data_buffer: data_buffer,
    }
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::BinaryAttribute;

    /// Synthetic cloud with the standard packed layout: pos+alpha, SH, then
    /// covariance columns.
    struct TestCloud {
        full_sh: bool,
    }

    impl TestCloud {
        fn sh_floats(&self) -> usize {
            if self.full_sh {
                48
            } else {
                12
            }
        }
    }

    impl GaussianCloud for TestCloud {
        fn num_gaussians(&self) -> usize {
            2
        }

        fn raw_data(&self) -> &[u8] {
            &[]
        }

        fn stride(&self) -> usize {
            (4 + self.sh_floats() + 9) * 4
        }

        fn has_full_sh(&self) -> bool {
            self.full_sh
        }

        fn attribute(&self, attr: SplatAttribute) -> BinaryAttribute {
            let bands = if self.full_sh { 4 } else { 1 };
            let sh_base = 16;
            let cov_base = 16 + self.sh_floats() * 4;
            let offset = match attr {
                SplatAttribute::PosWithAlpha => 0,
                SplatAttribute::RSh0 => sh_base,
                SplatAttribute::RSh1 => sh_base + 16,
                SplatAttribute::RSh2 => sh_base + 32,
                SplatAttribute::RSh3 => sh_base + 48,
                SplatAttribute::GSh0 => sh_base + bands * 16,
                SplatAttribute::GSh1 => sh_base + bands * 16 + 16,
                SplatAttribute::GSh2 => sh_base + bands * 16 + 32,
                SplatAttribute::GSh3 => sh_base + bands * 16 + 48,
                SplatAttribute::BSh0 => sh_base + 2 * bands * 16,
                SplatAttribute::BSh1 => sh_base + 2 * bands * 16 + 16,
                SplatAttribute::BSh2 => sh_base + 2 * bands * 16 + 32,
                SplatAttribute::BSh3 => sh_base + 2 * bands * 16 + 48,
                SplatAttribute::Cov3Col0 => cov_base,
                SplatAttribute::Cov3Col1 => cov_base + 12,
                SplatAttribute::Cov3Col2 => cov_base + 24,
            };
            BinaryAttribute {
                ty: AttributeType::Float,
                offset,
            }
        }

        fn for_each_pos_with_alpha(&self, _visitor: &mut dyn FnMut(&[f32; 3])) {}
    }

    #[test]
    fn test_attribute_set_arity() {
        assert_eq!(attribute_set(false).len(), 7);
        assert_eq!(attribute_set(true).len(), 16);
        assert!(attribute_set(false)
            .iter()
            .all(|a| !a.requires_full_sh()));
    }

    #[test]
    fn test_resolve_bindings_minimal_sh() {
        let cloud = TestCloud { full_sh: false };
        // hand out locations in call order
        let bindings = resolve_bindings(&cloud, |name| match name {
            "position" => 0,
            "r_sh0" => 1,
            "g_sh0" => 2,
            "b_sh0" => 3,
            "cov3_col0" => 4,
            "cov3_col1" => 5,
            "cov3_col2" => 6,
            _ => -1,
        });
        assert_eq!(bindings.len(), 7);
        assert_eq!(
            bindings[0],
            AttributeBinding {
                location: 0,
                components: 4,
                offset: 0
            }
        );
        // minimal SH: g_sh0 sits one vec4 after r_sh0
        assert_eq!(bindings[2].offset, 32);
        // covariance columns are vec3s packed after the SH block
        assert_eq!(bindings[4].components, 3);
        assert_eq!(bindings[4].offset, 16 + 48);
        assert_eq!(bindings[6].offset, 16 + 48 + 24);
    }

    #[test]
    fn test_resolve_bindings_full_sh() {
        let cloud = TestCloud { full_sh: true };
        let bindings = resolve_bindings(&cloud, |_| 1);
        assert_eq!(bindings.len(), 16);
        // every binding reads inside one record
        let stride = cloud.stride();
        for b in &bindings {
            assert!(b.offset + (b.components as usize) * 4 <= stride);
        }
    }
}
