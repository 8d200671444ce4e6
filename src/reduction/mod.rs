// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Generic tree reduction
//!
//! A reduction runs in three stages:
//! 1. chunk - applied to partition `i` of every table argument, giving `(a, 0, i)`
//! 2. combine - applied to consecutive groups of at most `split_every` earlier
//!    results, giving `(b, depth, i)`, repeated while more than `split_every`
//!    results remain
//! 3. aggregate - applied once to the remaining results, giving `(c, 0)`
//!
//! `combine` defaults to `aggregate`. It must be associative for the result to
//! be independent of `split_every`.

pub mod kernels;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Code, FrameError, FrameResult};
use crate::graph::{tokenize, Datum, GraphBuilder, Task, TaskKey};
use crate::scalar::ScalarValue;
use crate::table::{LazyScalar, Table};

pub use kernels::var_aggregate;

/// Keyword arguments passed to reduction functions
pub type Kwargs = BTreeMap<String, ScalarValue>;

/// Signature shared by chunk, combine and aggregate functions
pub type ReduceFn = Arc<dyn Fn(&[Datum], &Kwargs) -> FrameResult<Datum> + Send + Sync>;

/// A named reduction function
///
/// The name identifies the function in task names and tokens, so two
/// different functions must not share a name.
#[derive(Clone)]
pub struct Reducer {
    name: String,
    func: ReduceFn,
}

impl Reducer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Datum], &Kwargs) -> FrameResult<Datum> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, inputs: &[Datum], kwargs: &Kwargs) -> FrameResult<Datum> {
        (self.func)(inputs, kwargs)
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reducer({})", self.name)
    }
}

/// Positional argument of the chunk function
#[derive(Clone, Debug)]
pub enum Arg {
    /// Partition `i` is passed to chunk call `i`
    Table(Table),
    /// Passed unchanged to every chunk call
    Value(ScalarValue),
}

impl From<Table> for Arg {
    fn from(table: Table) -> Self {
        Arg::Table(table)
    }
}

impl From<ScalarValue> for Arg {
    fn from(value: ScalarValue) -> Self {
        Arg::Value(value)
    }
}

/// Fan-in of the combine stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitEvery {
    /// The context's `partframe.split_every`
    #[default]
    Default,
    /// No tree: aggregate consumes every chunk result
    Flat,
    Width(usize),
}

#[derive(Serialize)]
enum ArgToken<'a> {
    Table(&'a str),
    Value(&'a ScalarValue),
}

/// Optional parts of a reduction
#[derive(Debug, Clone, Default)]
pub struct ReductionOptions {
    pub split_every: SplitEvery,
    /// Prefix of the output key names, replacing the function names
    pub token: Option<String>,
    /// Passed to every function
    pub kwargs: Kwargs,
    pub chunk_kwargs: Kwargs,
    pub aggregate_kwargs: Kwargs,
    /// Only allowed with an explicit combine function
    pub combine_kwargs: Kwargs,
    /// Known result meta; inferred by a dry run when absent
    pub meta: Option<Datum>,
}

impl ReductionOptions {
    pub fn split_every(mut self, split_every: SplitEvery) -> Self {
        self.split_every = split_every;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn meta(mut self, meta: Datum) -> Self {
        self.meta = Some(meta);
        self
    }
}

fn merged(shared: &Kwargs, own: &Kwargs) -> Kwargs {
    let mut out = own.clone();
    for (k, v) in shared {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Build a tree reduction over the partitions of the table arguments
///
/// # Arguments
/// * `args` - Positional chunk arguments; all tables must have the same number of partitions
/// * `chunk` - Applied to each partition
/// * `aggregate` - Applied once to the list of final intermediate results
/// * `combine` - Applied to groups of intermediate results, defaults to `aggregate`
/// * `options` - Fan-in, key prefix, keyword arguments and meta
///
/// # Returns
/// A lazy value keyed `(<prefix>-agg-<token>, 0)`
pub fn reduction(
    args: &[Arg],
    chunk: &Reducer,
    aggregate: &Reducer,
    combine: Option<&Reducer>,
    options: &ReductionOptions,
) -> FrameResult<LazyScalar> {
    let tables: Vec<&Table> = args
        .iter()
        .filter_map(|a| match a {
            Arg::Table(t) => Some(t),
            Arg::Value(_) => None,
        })
        .collect();
    let first = tables
        .first()
        .ok_or_else(|| FrameError::new(Code::Invalid, "reduction needs at least one table argument"))?;
    let npartitions = first.npartitions();
    if tables.iter().any(|t| t.npartitions() != npartitions) {
        let counts: Vec<usize> = tables.iter().map(|t| t.npartitions()).collect();
        return Err(FrameError::new(
            Code::Invalid,
            format!("all arguments must have the same number of partitions, got {:?}", counts),
        ));
    }
    let ctx = first.ctx().clone();

    let split_every = match options.split_every {
        SplitEvery::Default => ctx.split_every()?,
        SplitEvery::Flat => npartitions.max(2),
        SplitEvery::Width(n) if n < 2 => {
            return Err(FrameError::new(
                Code::Invalid,
                format!("split_every must be an integer >= 2, got {}", n),
            ))
        }
        SplitEvery::Width(n) => n,
    };

    if combine.is_none() && !options.combine_kwargs.is_empty() {
        return Err(FrameError::new(Code::Invalid, "combine_kwargs provided with no combine"));
    }
    let chunk_kwargs = merged(&options.kwargs, &options.chunk_kwargs);
    let aggregate_kwargs = merged(&options.kwargs, &options.aggregate_kwargs);
    let (combine, combine_kwargs) = match combine {
        Some(c) => (c, merged(&options.kwargs, &options.combine_kwargs)),
        None => (aggregate, aggregate_kwargs.clone()),
    };

    let meta = match &options.meta {
        Some(m) => m.clone(),
        None => {
            let meta_args: Vec<Datum> = args
                .iter()
                .map(|a| match a {
                    Arg::Table(t) => Datum::Frame(t.meta().clone()),
                    Arg::Value(v) => Datum::Scalar(v.clone()),
                })
                .collect();
            let meta_chunk = chunk
                .call(&meta_args, &chunk_kwargs)
                .map_err(|e| FrameError::schema_inference(chunk.name(), e))?;
            aggregate
                .call(&[meta_chunk], &aggregate_kwargs)
                .map_err(|e| FrameError::schema_inference(aggregate.name(), e))?
        }
    };

    let arg_tokens: Vec<ArgToken> = args
        .iter()
        .map(|a| match a {
            Arg::Table(t) => ArgToken::Table(t.name()),
            Arg::Value(v) => ArgToken::Value(v),
        })
        .collect();
    let prefix = options.token.clone();
    let token_key = tokenize(&(
        prefix.clone().unwrap_or_else(|| format!("{}-{}", chunk.name(), aggregate.name())),
        &arg_tokens,
        &chunk_kwargs,
        &aggregate_kwargs,
        &combine_kwargs,
        split_every,
    ))?;

    let mut builder = GraphBuilder::new(first.graph());
    for t in &tables[1..] {
        builder.merge(t.graph());
    }

    // chunk
    let mut a = format!("{}-chunk-{}", prefix.as_deref().unwrap_or(chunk.name()), token_key);
    for i in 0..npartitions {
        let deps: Vec<TaskKey> = tables.iter().map(|t| t.key(i)).collect();
        let positions: Vec<Option<ScalarValue>> = args
            .iter()
            .map(|arg| match arg {
                Arg::Table(_) => None,
                Arg::Value(v) => Some(v.clone()),
            })
            .collect();
        let f = chunk.clone();
        let kw = chunk_kwargs.clone();
        builder.insert(
            TaskKey::with_path(a.clone(), vec![0, i]),
            Task::apply(chunk.name(), deps, move |inputs| {
                let mut tables = inputs.iter();
                let call_args = positions
                    .iter()
                    .map(|p| match p {
                        Some(v) => Ok(Datum::Scalar(v.clone())),
                        None => tables
                            .next()
                            .cloned()
                            .ok_or_else(|| FrameError::new(Code::Invalid, "missing partition input")),
                    })
                    .collect::<FrameResult<Vec<_>>>()?;
                f.call(&call_args, &kw)
            }),
        );
    }

    // combine
    let b = format!("{}-combine-{}", prefix.as_deref().unwrap_or(combine.name()), token_key);
    let mut k = npartitions;
    let mut depth = 0;
    while k > split_every {
        let groups: Vec<Vec<usize>> = (0..k)
            .collect::<Vec<_>>()
            .chunks(split_every)
            .map(<[usize]>::to_vec)
            .collect();
        for (part_i, inds) in groups.iter().enumerate() {
            let deps = inds.iter().map(|&i| TaskKey::with_path(a.clone(), vec![depth, i])).collect();
            let f = combine.clone();
            let kw = combine_kwargs.clone();
            builder.insert(
                TaskKey::with_path(b.clone(), vec![depth + 1, part_i]),
                Task::apply(combine.name(), deps, move |inputs| f.call(inputs, &kw)),
            );
        }
        log::debug!("reduction level {} combines {} results into {}", depth + 1, k, groups.len());
        k = groups.len();
        a = b.clone();
        depth += 1;
    }

    // aggregate
    let c = format!("{}-agg-{}", prefix.as_deref().unwrap_or(aggregate.name()), token_key);
    let deps = (0..k).map(|i| TaskKey::with_path(a.clone(), vec![depth, i])).collect();
    let f = aggregate.clone();
    let key = TaskKey::with_path(c, vec![0]);
    builder.insert(
        key.clone(),
        Task::apply(aggregate.name(), deps, move |inputs| f.call(inputs, &aggregate_kwargs)),
    );

    log::debug!(
        "reduction over {} partitions with split_every {}: {} new tasks",
        npartitions,
        split_every,
        builder.pending_len()
    );
    LazyScalar::new(ctx, builder.build(), key, meta)
}
