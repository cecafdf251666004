//! Filter document compilation: operators, conditions, pagination and predefined queries.

mod compiler;
mod operator;
mod predefined;

pub use compiler::{
    condition_for, scope_conditions, CompiledFilter, FilterCompiler, HasManyFilter, InputTransformer, ListParams,
    SortSpec,
};
pub(crate) use compiler::owner_value;
pub use operator::{Condition, FilterOp, JoinClause};
pub use predefined::{resolve_predefined, ArgsProcessor, PredefinedQuery};
