//! SPIR-V reflection for the binding slots a shader declares.
//!
//! Decoding is done by `spirq`; this module applies the engine's policy on
//! top: descriptor set 0 only, no arrays, no storage resources, and a separate
//! image and sampler at one index merged into a combined slot.

use spirq::spirv::ExecutionModel;
use spirq::ty::DescriptorType;
use spirq::var::Variable;
use spirq::ReflectConfig;

use crate::types::{Binding, ShaderStage};

const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;
const UNIFORM_ALIGNMENT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReflectionError {
    #[error("byte-code is not SPIR-V (magic {0:#010x})")]
    BadMagic(u32),
    #[error("byte-code is truncated at word {0}")]
    Truncated(usize),
    #[error("malformed SPIR-V: {0}")]
    Malformed(String),
    #[error("module declares no entry point")]
    MissingEntryPoint,
    #[error("execution model {0} is not a vertex or fragment stage")]
    UnsupportedStage(String),
    #[error("expected a {expected} shader, found a {found} shader")]
    UnexpectedStage {
        expected: ShaderStage,
        found: ShaderStage,
    },
    #[error("binding {binding} lives in descriptor set {set}; only set 0 is supported")]
    UnsupportedSet { binding: u32, set: u32 },
    #[error("binding {binding} ('{name}') is a {what}, which is not supported")]
    UnsupportedResource {
        binding: u32,
        name: String,
        what: &'static str,
    },
    #[error("uniform block at binding {binding} ('{name}') has no representable size")]
    InvalidBlockSize { binding: u32, name: String },
    #[error("binding {0} is declared more than once")]
    DuplicateBinding(u32),
    #[error("separate image at binding {0} has no sampler at the same binding")]
    UnpairedImage(u32),
    #[error("separate sampler at binding {0} has no image at the same binding")]
    UnpairedSampler(u32),
}

/// Everything reflection recovers from one shader module.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub bindings: Vec<Binding>,
}

/// Extracts the ordered binding list from compiled byte-code.
pub fn extract(code: &[u32]) -> Result<Vec<Binding>, ReflectionError> {
    reflect(code).map(|reflection| reflection.bindings)
}

/// Reflects entry point, stage and bindings from compiled byte-code.
///
/// Bindings are sorted by index. Only the first entry point is considered.
pub fn reflect(code: &[u32]) -> Result<ShaderReflection, ReflectionError> {
    check_header(code)?;
    let entry_points = ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|err| ReflectionError::Malformed(err.to_string()))?;
    let entry = entry_points
        .into_iter()
        .next()
        .ok_or(ReflectionError::MissingEntryPoint)?;
    let stage = match entry.exec_model {
        ExecutionModel::Vertex => ShaderStage::Vertex,
        ExecutionModel::Fragment => ShaderStage::Fragment,
        other => return Err(ReflectionError::UnsupportedStage(format!("{other:?}"))),
    };

    let mut declared = Vec::new();
    for variable in &entry.vars {
        if let Some(resource) = classify(variable)? {
            declared.push(resource);
        }
    }

    let bindings = merge_resources(declared, stage)?;
    tracing::trace!(%stage, count = bindings.len(), "reflected bindings");
    Ok(ShaderReflection {
        stage,
        entry_point: entry.name,
        bindings,
    })
}

fn check_header(code: &[u32]) -> Result<(), ReflectionError> {
    match code.first() {
        Some(&magic) if magic != MAGIC => Err(ReflectionError::BadMagic(magic)),
        _ if code.len() < HEADER_WORDS => Err(ReflectionError::Truncated(code.len())),
        _ => Ok(()),
    }
}

/// Resource as declared, before separate image/sampler pairs are merged.
#[derive(Debug)]
struct Declared {
    index: u32,
    shape: Shape,
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Uniform(u32),
    Combined,
    SeparateImage,
    SeparateSampler,
}

fn classify(variable: &Variable) -> Result<Option<Declared>, ReflectionError> {
    let (name, desc_bind, desc_ty, ty, nbind) = match variable {
        Variable::Descriptor {
            name,
            desc_bind,
            desc_ty,
            ty,
            nbind,
            ..
        } => (name, desc_bind, desc_ty, ty, *nbind),
        Variable::PushConstant { name, .. } => {
            return Err(ReflectionError::UnsupportedResource {
                binding: 0,
                name: name.clone().unwrap_or_default(),
                what: "push constant block",
            });
        }
        _ => return Ok(None),
    };

    let index = desc_bind.bind();
    let set = desc_bind.set();
    if set != 0 {
        return Err(ReflectionError::UnsupportedSet {
            binding: index,
            set,
        });
    }
    let display_name = name.clone().unwrap_or_else(|| format!("binding {index}"));
    let unsupported = |what| ReflectionError::UnsupportedResource {
        binding: index,
        name: display_name.clone(),
        what,
    };
    // Runtime-sized arrays report zero bindings.
    if nbind != 1 {
        return Err(unsupported("descriptor array"));
    }

    let shape = match desc_ty {
        DescriptorType::UniformBuffer() => {
            let size = uniform_size(ty.nbyte()).ok_or_else(|| {
                ReflectionError::InvalidBlockSize {
                    binding: index,
                    name: display_name.clone(),
                }
            })?;
            Shape::Uniform(size)
        }
        DescriptorType::CombinedImageSampler() => Shape::Combined,
        DescriptorType::SampledImage() => Shape::SeparateImage,
        DescriptorType::Sampler() => Shape::SeparateSampler,
        DescriptorType::StorageBuffer(..) => return Err(unsupported("storage buffer")),
        DescriptorType::StorageImage(..) => return Err(unsupported("storage image")),
        _ => return Err(unsupported("descriptor kind")),
    };

    Ok(Some(Declared {
        index,
        shape,
        name: name.clone(),
    }))
}

/// Block size rounded up to uniform alignment; `None` for unsized blocks or
/// blocks that do not fit in `u32`.
fn uniform_size(nbyte: Option<usize>) -> Option<u32> {
    let size = u32::try_from(nbyte?).ok()?;
    size.checked_next_multiple_of(UNIFORM_ALIGNMENT)
}

fn merge_resources(
    declared: Vec<Declared>,
    stage: ShaderStage,
) -> Result<Vec<Binding>, ReflectionError> {
    let mut images: Vec<&Declared> = Vec::new();
    let mut samplers: Vec<&Declared> = Vec::new();
    let mut bindings: Vec<Binding> = Vec::new();

    for resource in &declared {
        match resource.shape {
            Shape::Uniform(size) => {
                let mut binding = Binding::uniform_buffer(resource.index, stage, size);
                binding.name = resource.name.clone();
                bindings.push(binding);
            }
            Shape::Combined => {
                let mut binding = Binding::combined_image_sampler(resource.index, stage);
                binding.name = resource.name.clone();
                bindings.push(binding);
            }
            Shape::SeparateImage => images.push(resource),
            Shape::SeparateSampler => samplers.push(resource),
        }
    }

    for image in images {
        let Some(position) = samplers.iter().position(|s| s.index == image.index) else {
            return Err(ReflectionError::UnpairedImage(image.index));
        };
        samplers.remove(position);
        let mut binding = Binding::combined_image_sampler(image.index, stage);
        binding.name = image.name.clone();
        bindings.push(binding);
    }
    if let Some(sampler) = samplers.first() {
        return Err(ReflectionError::UnpairedSampler(sampler.index));
    }

    bindings.sort_by_key(|binding| binding.index);
    if let Some(pair) = bindings.windows(2).find(|pair| pair[0].index == pair[1].index) {
        return Err(ReflectionError::DuplicateBinding(pair[0].index));
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile_to_spirv, CompileRequest, DEFAULT_VERTEX_GLSL};
    use crate::types::{BindingKind, ShaderCompiler, ShaderLanguage};

    fn spirv(source: &str, stage: ShaderStage) -> Vec<u32> {
        let request = CompileRequest {
            source,
            name: "reflect.glsl",
            stage,
            language: ShaderLanguage::Glsl,
            entry_point: "main",
        };
        match compile_to_spirv(ShaderCompiler::NagaGlsl, &request) {
            Ok(code) => code,
            Err(err) => panic!("{err}"),
        }
    }

    fn fragment(declarations: &str, body: &str) -> Vec<u32> {
        let source = format!(
            "#version 450\nlayout(location = 0) in vec2 v_uv;\n\
             layout(location = 0) out vec4 out_color;\n{declarations}\n\
             void main() {{\n    out_color = vec4(v_uv, 0.0, 1.0);\n{body}\n}}\n"
        );
        spirv(&source, ShaderStage::Fragment)
    }

    mod op {
        pub const NAME: u16 = 5;
        pub const MEMORY_MODEL: u16 = 14;
        pub const ENTRY_POINT: u16 = 15;
        pub const EXECUTION_MODE: u16 = 16;
        pub const CAPABILITY: u16 = 17;
        pub const TYPE_VOID: u16 = 19;
        pub const TYPE_INT: u16 = 21;
        pub const TYPE_FLOAT: u16 = 22;
        pub const TYPE_VECTOR: u16 = 23;
        pub const TYPE_IMAGE: u16 = 25;
        pub const TYPE_SAMPLED_IMAGE: u16 = 27;
        pub const TYPE_ARRAY: u16 = 28;
        pub const TYPE_STRUCT: u16 = 30;
        pub const TYPE_POINTER: u16 = 32;
        pub const TYPE_FUNCTION: u16 = 33;
        pub const CONSTANT: u16 = 43;
        pub const SPEC_CONSTANT: u16 = 50;
        pub const FUNCTION: u16 = 54;
        pub const FUNCTION_END: u16 = 56;
        pub const VARIABLE: u16 = 59;
        pub const DECORATE: u16 = 71;
        pub const MEMBER_DECORATE: u16 = 72;
        pub const LABEL: u16 = 248;
        pub const RETURN: u16 = 253;
    }

    mod decoration {
        pub const SPEC_ID: u32 = 1;
        pub const BLOCK: u32 = 2;
        pub const ARRAY_STRIDE: u32 = 6;
        pub const BINDING: u32 = 33;
        pub const DESCRIPTOR_SET: u32 = 34;
        pub const OFFSET: u32 = 35;
    }

    const UNIFORM_CONSTANT: u32 = 0;
    const UNIFORM: u32 = 2;

    const MAIN: u32 = 1;
    const VOID: u32 = 2;
    const VOID_FN: u32 = 3;
    const LABEL: u32 = 4;
    const FLOAT: u32 = 10;
    const VEC4: u32 = 11;
    const UINT: u32 = 12;
    const IMAGE: u32 = 13;
    const SAMPLED_IMAGE: u32 = 14;

    /// Minimal fragment module with sections kept in SPIR-V layout order.
    struct Assembler {
        annotations: Vec<u32>,
        globals: Vec<u32>,
        entry_point: bool,
    }

    fn encode(words: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
        let count = operands.len() as u32 + 1;
        words.push((count << 16) | u32::from(opcode));
        words.extend_from_slice(operands);
    }

    fn literal(text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    impl Assembler {
        fn new() -> Self {
            let mut globals = Vec::new();
            encode(&mut globals, op::TYPE_VOID, &[VOID]);
            encode(&mut globals, op::TYPE_FUNCTION, &[VOID_FN, VOID]);
            encode(&mut globals, op::TYPE_FLOAT, &[FLOAT, 32]);
            encode(&mut globals, op::TYPE_VECTOR, &[VEC4, FLOAT, 4]);
            encode(&mut globals, op::TYPE_INT, &[UINT, 32, 0]);
            encode(&mut globals, op::TYPE_IMAGE, &[IMAGE, FLOAT, 1, 0, 0, 0, 1, 0]);
            encode(&mut globals, op::TYPE_SAMPLED_IMAGE, &[SAMPLED_IMAGE, IMAGE]);
            Self {
                annotations: Vec::new(),
                globals,
                entry_point: true,
            }
        }

        fn without_entry_point(mut self) -> Self {
            self.entry_point = false;
            self
        }

        fn decorate(&mut self, operands: &[u32]) -> &mut Self {
            encode(&mut self.annotations, op::DECORATE, operands);
            self
        }

        fn member_decorate(&mut self, operands: &[u32]) -> &mut Self {
            encode(&mut self.annotations, op::MEMBER_DECORATE, operands);
            self
        }

        fn binding(&mut self, target: u32, binding: u32) -> &mut Self {
            self.decorate(&[target, decoration::DESCRIPTOR_SET, 0])
                .decorate(&[target, decoration::BINDING, binding])
        }

        fn global(&mut self, opcode: u16, operands: &[u32]) -> &mut Self {
            encode(&mut self.globals, opcode, operands);
            self
        }

        fn finish(&self) -> Vec<u32> {
            let mut words = vec![MAGIC, 0x0001_0000, 0, 256, 0];
            encode(&mut words, op::CAPABILITY, &[1]);
            encode(&mut words, op::MEMORY_MODEL, &[0, 1]);
            if self.entry_point {
                let mut operands = vec![4, MAIN];
                operands.extend(literal("main"));
                encode(&mut words, op::ENTRY_POINT, &operands);
                encode(&mut words, op::EXECUTION_MODE, &[MAIN, 7]);
            }
            let mut name = vec![MAIN];
            name.extend(literal("main"));
            encode(&mut words, op::NAME, &name);
            words.extend_from_slice(&self.annotations);
            words.extend_from_slice(&self.globals);
            encode(&mut words, op::FUNCTION, &[VOID, MAIN, 0, VOID_FN]);
            encode(&mut words, op::LABEL, &[LABEL]);
            encode(&mut words, op::RETURN, &[]);
            encode(&mut words, op::FUNCTION_END, &[]);
            words
        }
    }

    #[test]
    fn reflects_uniform_block_and_texture_in_binding_order() {
        let code = fragment(
            "layout(set = 0, binding = 1) uniform texture2D albedo_texture;\n\
             layout(set = 0, binding = 1) uniform sampler albedo_sampler;\n\
             layout(set = 0, binding = 0) uniform Params { vec4 tint; float time; } params;",
            "    out_color *= params.tint * params.time * texture(sampler2D(albedo_texture, albedo_sampler), v_uv);",
        );

        let reflection = reflect(&code).unwrap();
        assert_eq!(reflection.stage, ShaderStage::Fragment);
        assert_eq!(reflection.entry_point, "main");
        let shape: Vec<_> = reflection
            .bindings
            .iter()
            .map(|b| (b.index, b.kind, b.byte_size))
            .collect();
        assert_eq!(
            shape,
            vec![
                (0, BindingKind::UniformBuffer, Some(32)),
                (1, BindingKind::CombinedImageSampler, None),
            ]
        );
    }

    #[test]
    fn block_size_follows_member_offsets() {
        let code = fragment(
            "layout(set = 0, binding = 0) uniform Camera { mat4 view; vec3 eye; } camera;",
            "    out_color.xyz += (camera.view * vec4(camera.eye, 1.0)).xyz;",
        );
        let bindings = extract(&code).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].byte_size, Some(80));
    }

    #[test]
    fn rejects_unpaired_sampler() {
        let code = fragment("layout(set = 0, binding = 4) uniform sampler lonely;", "");
        assert_eq!(extract(&code), Err(ReflectionError::UnpairedSampler(4)));
    }

    #[test]
    fn rejects_non_zero_descriptor_set() {
        let code = fragment(
            "layout(set = 1, binding = 0) uniform Params { vec4 tint; } params;",
            "    out_color *= params.tint;",
        );
        assert_eq!(
            extract(&code),
            Err(ReflectionError::UnsupportedSet { binding: 0, set: 1 })
        );
    }

    #[test]
    fn rejects_storage_buffers_and_push_constants() {
        let code = fragment(
            "layout(set = 0, binding = 2) buffer Data { vec4 values[]; } data;",
            "    out_color *= data.values[0];",
        );
        assert!(matches!(
            extract(&code),
            Err(ReflectionError::UnsupportedResource {
                binding: 2,
                what: "storage buffer",
                ..
            })
        ));

        let code = fragment(
            "layout(push_constant) uniform Push { vec4 tint; } push;",
            "    out_color *= push.tint;",
        );
        assert!(matches!(
            extract(&code),
            Err(ReflectionError::UnsupportedResource {
                what: "push constant block",
                ..
            })
        ));
    }

    #[test]
    fn rejects_duplicate_bindings() {
        let mut asm = Assembler::new();
        asm.binding(21, 0)
            .binding(23, 0)
            .global(op::TYPE_POINTER, &[20, UNIFORM_CONSTANT, SAMPLED_IMAGE])
            .global(op::VARIABLE, &[20, 21, UNIFORM_CONSTANT])
            .global(op::VARIABLE, &[20, 23, UNIFORM_CONSTANT]);

        assert_eq!(
            extract(&asm.finish()),
            Err(ReflectionError::DuplicateBinding(0))
        );
    }

    #[test]
    fn vertex_stage_is_reported() {
        let reflection = reflect(&spirv(DEFAULT_VERTEX_GLSL, ShaderStage::Vertex)).unwrap();
        assert_eq!(reflection.stage, ShaderStage::Vertex);
        assert_eq!(reflection.entry_point, "main");
        assert!(reflection.bindings.is_empty());
    }

    #[test]
    fn rejects_malformed_streams() {
        assert_eq!(
            extract(&[0xdead_beef, 0, 0, 0, 0]),
            Err(ReflectionError::BadMagic(0xdead_beef))
        );
        assert_eq!(extract(&[MAGIC]), Err(ReflectionError::Truncated(1)));
        assert_eq!(extract(&[]), Err(ReflectionError::Truncated(0)));

        let mut words = Assembler::new().finish();
        words.push((4 << 16) | u32::from(op::VARIABLE));
        assert!(extract(&words).is_err());

        assert_eq!(
            extract(&Assembler::new().without_entry_point().finish()),
            Err(ReflectionError::MissingEntryPoint)
        );
    }

    #[test]
    fn oversized_uniform_block_is_an_error() {
        // vec4[0x1000_0000] with a 16-byte stride spans 4 GiB.
        let mut asm = Assembler::new();
        asm.decorate(&[31, decoration::ARRAY_STRIDE, 16])
            .decorate(&[32, decoration::BLOCK])
            .member_decorate(&[32, 0, decoration::OFFSET, 0])
            .binding(34, 0)
            .global(op::CONSTANT, &[UINT, 30, 0x1000_0000])
            .global(op::TYPE_ARRAY, &[31, VEC4, 30])
            .global(op::TYPE_STRUCT, &[32, 31])
            .global(op::TYPE_POINTER, &[33, UNIFORM, 32])
            .global(op::VARIABLE, &[33, 34, UNIFORM]);

        assert!(extract(&asm.finish()).is_err());
    }

    #[test]
    fn uniform_size_rounds_and_rejects_overflow() {
        assert_eq!(uniform_size(Some(20)), Some(32));
        assert_eq!(uniform_size(Some(64)), Some(64));
        assert_eq!(uniform_size(None), None);
        assert_eq!(uniform_size(Some(u32::MAX as usize)), None);
        assert_eq!(uniform_size(Some(1usize << 32)), None);
    }

    #[test]
    fn self_referential_struct_is_an_error() {
        let mut asm = Assembler::new();
        asm.decorate(&[40, decoration::BLOCK])
            .member_decorate(&[40, 0, decoration::OFFSET, 0])
            .member_decorate(&[40, 1, decoration::OFFSET, 16])
            .binding(42, 0)
            .global(op::TYPE_STRUCT, &[40, 40, 40])
            .global(op::TYPE_POINTER, &[41, UNIFORM, 40])
            .global(op::VARIABLE, &[41, 42, UNIFORM]);

        assert!(extract(&asm.finish()).is_err());
    }

    #[test]
    fn spec_constant_sized_descriptor_array_is_rejected() {
        let mut asm = Assembler::new();
        asm.decorate(&[50, decoration::SPEC_ID, 0])
            .binding(53, 0)
            .global(op::SPEC_CONSTANT, &[UINT, 50, 4])
            .global(op::TYPE_ARRAY, &[51, SAMPLED_IMAGE, 50])
            .global(op::TYPE_POINTER, &[52, UNIFORM_CONSTANT, 51])
            .global(op::VARIABLE, &[52, 53, UNIFORM_CONSTANT]);

        assert!(extract(&asm.finish()).is_err());
    }

    #[test]
    fn constant_sized_descriptor_array_is_rejected() {
        let mut asm = Assembler::new();
        asm.binding(63, 0)
            .global(op::CONSTANT, &[UINT, 60, 3])
            .global(op::TYPE_ARRAY, &[61, SAMPLED_IMAGE, 60])
            .global(op::TYPE_POINTER, &[62, UNIFORM_CONSTANT, 61])
            .global(op::VARIABLE, &[62, 63, UNIFORM_CONSTANT]);

        assert!(matches!(
            extract(&asm.finish()),
            Err(ReflectionError::UnsupportedResource {
                binding: 0,
                what: "descriptor array",
                ..
            })
        ));
    }
}
