//! Declaration-to-component construction.
//!
//! [`Pipeline::assemble_with`](crate::Pipeline::assemble_with) builds every
//! component through a [`ComponentFactory`], so tests and embedders can swap
//! in their own sources and sinks while keeping the assembly, wiring and
//! shutdown logic.

use shiplog_core::{
    InputDeclaration, OutputDeclaration, PipelineError, Sink, SinkContext, Source, SourceContext,
};

pub trait ComponentFactory {
    /// Build the sink for `decl`, the `index`-th declaration of its section.
    fn build_sink(
        &self,
        decl: &OutputDeclaration,
        index: usize,
        ctx: &SinkContext,
    ) -> Result<Box<dyn Sink>, PipelineError>;

    /// Build the source for `decl`, the `index`-th declaration of its section.
    fn build_source(
        &self,
        decl: &InputDeclaration,
        index: usize,
        ctx: &SourceContext,
    ) -> Result<Box<dyn Source>, PipelineError>;
}

/// The sources and sinks shipped with shiplog.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinComponents;

impl ComponentFactory for BuiltinComponents {
    fn build_sink(
        &self,
        decl: &OutputDeclaration,
        index: usize,
        ctx: &SinkContext,
    ) -> Result<Box<dyn Sink>, PipelineError> {
        shiplog_outputs::build_sink(decl, index, ctx)
    }

    fn build_source(
        &self,
        decl: &InputDeclaration,
        index: usize,
        ctx: &SourceContext,
    ) -> Result<Box<dyn Source>, PipelineError> {
        shiplog_inputs::build_source(decl, index, ctx)
    }
}
