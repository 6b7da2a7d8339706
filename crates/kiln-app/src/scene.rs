// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use kiln_render::{
    DrawableData, DrawableId, DrawableSource, ShaderId, ShaderLanguage, ShaderSource, Vertex,
};

const VERTEX: &str = r#"#version 450
layout(location = 0) in vec3 in_pos;
layout(location = 1) in vec3 in_color;
layout(location = 0) out vec3 v_color;
void main() {
    gl_Position = vec4(in_pos, 1.0);
    v_color = in_color;
}
"#;

const FRAG_VERTEX_COLOR: &str = r#"#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(v_color, 1.0);
}
"#;

const FRAG_INVERTED: &str = r#"#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(vec3(1.0) - v_color, 1.0);
}
"#;

pub const TRIANGLE: DrawableId = DrawableId(1);
pub const QUAD: DrawableId = DrawableId(2);
/// Toggled on and off by the host loop.
pub const BLINKER: DrawableId = DrawableId(3);

/// A triangle and a quad sharing one shader, plus a quad on a second shader.
pub struct DemoScene {
    drawables: HashMap<DrawableId, DrawableData>,
    shaders: HashMap<ShaderId, ShaderSource>,
}

fn quad(x: f32, y: f32, half: f32, color: [f32; 3]) -> Vec<Vertex> {
    vec![
        Vertex::new([x - half, y - half, 0.0], color),
        Vertex::new([x + half, y - half, 0.0], [1.0, 1.0, 1.0]),
        Vertex::new([x + half, y + half, 0.0], color),
        Vertex::new([x - half, y + half, 0.0], [0.0, 0.0, 0.0]),
    ]
}

impl DemoScene {
    pub fn new() -> Self {
        let glsl = |fragment: &str| ShaderSource {
            language: ShaderLanguage::Glsl,
            vertex: VERTEX.to_owned(),
            fragment: fragment.to_owned(),
        };
        let shaders = HashMap::from([
            (ShaderId::from("vertex_color"), glsl(FRAG_VERTEX_COLOR)),
            (ShaderId::from("inverted"), glsl(FRAG_INVERTED)),
        ]);

        let quad_indices = vec![0, 1, 2, 2, 3, 0];
        let drawables = HashMap::from([
            (
                TRIANGLE,
                DrawableData {
                    vertices: vec![
                        Vertex::new([-0.5, -0.6, 0.0], [1.0, 0.0, 0.0]),
                        Vertex::new([-0.1, 0.2, 0.0], [0.0, 1.0, 0.0]),
                        Vertex::new([-0.9, 0.2, 0.0], [0.0, 0.0, 1.0]),
                    ],
                    indices: vec![0, 1, 2],
                    shader: ShaderId::from("vertex_color"),
                },
            ),
            (
                QUAD,
                DrawableData {
                    vertices: quad(0.5, -0.2, 0.3, [0.9, 0.6, 0.1]),
                    indices: quad_indices.clone(),
                    shader: ShaderId::from("vertex_color"),
                },
            ),
            (
                BLINKER,
                DrawableData {
                    vertices: quad(0.0, 0.6, 0.2, [0.2, 0.4, 0.9]),
                    indices: quad_indices,
                    shader: ShaderId::from("inverted"),
                },
            ),
        ]);
        Self { drawables, shaders }
    }

    pub fn ids(&self) -> impl Iterator<Item = DrawableId> + '_ {
        self.drawables.keys().copied()
    }
}

impl Default for DemoScene {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawableSource for DemoScene {
    fn drawable(&self, id: DrawableId) -> Option<&DrawableData> {
        self.drawables.get(&id)
    }

    fn shader(&self, id: &ShaderId) -> Option<&ShaderSource> {
        self.shaders.get(id)
    }
}
