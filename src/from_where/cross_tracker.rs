use tracing::trace;

use super::{constant, BuildContext, BuilderRegistry, FromWhere};
use crate::error::QueryError;
use crate::schema::AliasScope;
use crate::validator::ResolvedComparison;
use crate::value::ValueWrapperParameters;

/// Builds one resolved comparison over the whole search scope.
///
/// Each tracker-specific target gets its own alias scope and the resulting
/// fragments are OR-ed. When more than one tracker is searched, every
/// tracker-specific branch only applies to the artifacts of its tracker, so a
/// field is never matched against the field id of another tracker.
pub struct CrossTrackerFromWhereBuilder<'r> {
    registry: &'r BuilderRegistry,
    guard_trackers: bool,
}

impl<'r> CrossTrackerFromWhereBuilder<'r> {
    pub fn new(registry: &'r BuilderRegistry, scope_size: usize) -> Self {
        Self {
            registry,
            guard_trackers: scope_size > 1,
        }
    }

    pub fn from_where(
        &self,
        resolved: &ResolvedComparison,
        parameters: &ValueWrapperParameters,
    ) -> Result<FromWhere, QueryError> {
        let comparison = &resolved.comparison;
        let builder = self
            .registry
            .get(resolved.kind, comparison.operator())
            .ok_or_else(|| QueryError::unsupported_comparison(comparison))?;

        let mut combined: Option<FromWhere> = None;
        for target in &resolved.targets {
            let context = BuildContext {
                parameters,
                aliases: AliasScope::new(comparison.id(), target.tracker),
            };
            let mut fragment = builder.from_where(&target.backend, comparison, &context)?;
            if let Some(tracker) = target.tracker.filter(|_| self.guard_trackers) {
                fragment = fragment.guarded_by(tracker);
            }
            combined = Some(match combined {
                Some(previous) => previous.or(fragment),
                None => fragment,
            });
        }
        trace!(comparison = %comparison, targets = resolved.targets.len(), "comparison built");

        // 校验后的比较至少有一个目标
        Ok(combined.unwrap_or_else(|| FromWhere::condition(constant(false))))
    }
}
