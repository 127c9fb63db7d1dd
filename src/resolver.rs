//! Opaque capability forwarded to builders for source-language semantic
//! queries. The engine never inspects or constructs its contents; a
//! concrete implementation lives entirely outside this crate's scope.

/// Placeholder for a semantic-analysis capability. Builders that need one
/// receive it via [`crate::build_step::BuildStep::resolver`]; this crate
/// never calls into it itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct Resolver;
