//! Stoch Runtime.
//!
//! Generative functions over the stoch IR. A program is a host closure
//! staged into a [`Graph`](stoch_ir::Graph) whose custom nodes sample,
//! observe and call sub-programs; interpreters then give that one graph
//! several meanings.
//!
//! # Architecture
//!
//! - [`gfi`] - [`Program`] and [`Measure`]: simulate, assess, update,
//!   generate and the reflective operations
//! - [`programs`] - program kinds: distributions, staged functions ([`gen`]),
//!   vectorised programs and marginals
//! - `handlers` - the effect handlers behind each protocol operation
//! - [`interpret`] - forward, seeded, vectorised and enumerating interpreters
//! - [`reflect`] - discretisation, lowering, blankets and trace types
//! - [`distributions`] - built-in distributions
//! - [`choices`], [`selection`], [`trace`] - protocol data
//! - [`context`] - keys, lanes and the handler stack of one call
//! - [`error`] - error types for runtime failures
//!
//! # Example
//!
//! ```ignore
//! use stoch_runtime::{bernoulli, gen, Context, ProbabilisticStager};
//! use stoch_foundation::Key;
//! use stoch_ir::Atom;
//!
//! let model = gen("coin", |s, _| {
//!     let x = s.choose("x", &bernoulli(), &[Atom::from(0.3)])?;
//!     Ok(vec![x])
//! });
//! let trace = model.simulate(&mut Context::seeded(Key::new(0)), &[])?;
//! let all = model.enumerate(&mut Context::new(), &[])?;
//! ```

pub mod choices;
pub mod context;
pub mod distributions;
pub mod error;
pub mod gfi;
mod handlers;
pub mod interpret;
pub mod ops;
pub mod programs;
pub mod reflect;
pub mod selection;
pub mod trace;

pub use choices::{ChoiceMap, ChoiceTree};
pub use context::{Context, Entropy};
pub use distributions::{
    bernoulli, beta, categorical, flip, geometric, logsumexp, normal, uniform, Dist, Distribution,
};
pub use error::{Error, Result};
pub use gfi::{GenerativeFunction, Measure, Program, ReflectiveMeasure, Update};
pub use interpret::{eliminate, enumerate, evaluate, modular_vmap, seed, Enumeration, SeededKernel};
pub use ops::{ProbabilisticStager, TraceSite};
pub use programs::{estimate_log_marginal, gen, FnProgram, Importance, VmapProgram};
pub use reflect::blanket::BlanketFlags;
pub use reflect::trace_type::{Support, TraceType};
pub use selection::{sel, sel_all, sel_none, Selection};
pub use trace::{Trace, TraceBody};
