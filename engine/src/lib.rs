pub mod extract;
pub mod filter;
pub mod produce;
pub mod record;
pub mod report;
pub mod response;
pub mod run;
pub mod source;
pub mod template;
pub mod transport;
pub mod worker;

pub use extract::Extracter;
pub use filter::{FilterRange, ResponseFilters, parse_range_list};
pub use produce::{Multiplexer, NamedSource};
pub use record::{Recorder, RunRecord};
pub use report::RunStats;
pub use response::{RequestError, Response, TextStats};
pub use run::{Runner, RunnerOptions};
pub use source::{
    ExecSource, FileSource, RangeSource, Source, StdinSource, ValueSource, parse_placeholder,
};
pub use template::{HeaderDirective, RequestTemplate};
pub use transport::{AddressFamily, TransportOptions, build_client};
pub use worker::WorkerOptions;
