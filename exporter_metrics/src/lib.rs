pub mod exporters;
pub mod family;
pub mod instrument;
pub mod registry;
pub mod snapshot;
pub mod summary;

pub use exporters::PrometheusExporter;
pub use family::{FamilySpec, MetricKind, STATE_LABEL};
pub use instrument::InstrumentedCaller;
pub use registry::{ApiCallMetrics, ApiSurface, CycleMetrics, CycleStatus, MetricsRegistry};
pub use snapshot::{MetricSnapshot, Observation, ObservationOp, SnapshotBuilder, SnapshotPublisher};
pub use summary::WindowedSummary;
