pub mod buffer_pool;
pub mod frame_queue;
pub mod track_selection;
