//! Ordered-tree marshaling of a [`DetectionResult`].
//!
//! The wire shape, order preserved at every level:
//!
//! ```text
//! result  := list<face>
//! face    := tuple(rect, list<rect>)
//! rect    := tuple(x, y, width, height)     all integers
//! ```
//!
//! A foreign boundary implements [`TreeBuilder`] with its own allocation
//! primitives; geometry and detection never see the foreign types.

use crate::types::{DetectionResult, FaceResult, Rectangle};
use std::convert::Infallible;

pub trait TreeBuilder {
    type Node;
    type Error;

    fn int(&mut self, value: isize) -> Result<Self::Node, Self::Error>;
    fn tuple(&mut self, items: Vec<Self::Node>) -> Result<Self::Node, Self::Error>;
    fn list(&mut self, items: Vec<Self::Node>) -> Result<Self::Node, Self::Error>;
}

impl Rectangle {
    pub fn marshal<B: TreeBuilder>(&self, builder: &mut B) -> Result<B::Node, B::Error> {
        let fields = vec![
            builder.int(self.x)?,
            builder.int(self.y)?,
            builder.int(self.width)?,
            builder.int(self.height)?,
        ];
        builder.tuple(fields)
    }
}

impl FaceResult {
    pub fn marshal<B: TreeBuilder>(&self, builder: &mut B) -> Result<B::Node, B::Error> {
        let face = self.face.marshal(builder)?;
        let features = self
            .features
            .iter()
            .map(|rect| rect.marshal(builder))
            .collect::<Result<Vec<_>, _>>()?;
        let features = builder.list(features)?;
        builder.tuple(vec![face, features])
    }
}

impl DetectionResult {
    pub fn marshal<B: TreeBuilder>(&self, builder: &mut B) -> Result<B::Node, B::Error> {
        let faces = self
            .faces
            .iter()
            .map(|face| face.marshal(builder))
            .collect::<Result<Vec<_>, _>>()?;
        builder.list(faces)
    }
}

/// Builds the wire shape as nested JSON arrays.
pub struct JsonTree;

impl TreeBuilder for JsonTree {
    type Node = serde_json::Value;
    type Error = Infallible;

    fn int(&mut self, value: isize) -> Result<Self::Node, Self::Error> {
        Ok(serde_json::Value::from(value))
    }

    fn tuple(&mut self, items: Vec<Self::Node>) -> Result<Self::Node, Self::Error> {
        Ok(serde_json::Value::Array(items))
    }

    fn list(&mut self, items: Vec<Self::Node>) -> Result<Self::Node, Self::Error> {
        Ok(serde_json::Value::Array(items))
    }
}
