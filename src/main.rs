
pub mod aggr;

pub use aggr::{
    ActivationAggregation, ActivationEvent, AggregationEngine, AggregationError,
    AggregationInterval, AggregationRepository, AggregatorConfig, BucketCoordinate, GroupResolver,
    IntervalClock, RepositoryOps, SqliteAggregationRepository,
};
