use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::{MediaGroupAggregator, PostPipeline};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<PostPipeline>,
    pub albums: MediaGroupAggregator,
}

impl AppState {
    pub fn new(config: Config, pipeline: PostPipeline) -> Self {
        let pipeline = Arc::new(pipeline);
        let albums = MediaGroupAggregator::new(pipeline.clone(), config.media_group_delay);
        AppState {
            config: Arc::new(config),
            pipeline,
            albums,
        }
    }
}
