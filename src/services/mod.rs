/// Administrative diagnostics and garbage collection.
pub mod admin_service;
/// Two-legged event fan-out.
pub mod broadcaster;
/// Per-stream poll and keepalive loops.
pub mod consumer;
/// OpenAPI document assembly.
pub mod documentation;
/// Broadcast helpers shared by every producer.
pub mod events;
/// Match lifecycle operations.
pub mod game_service;
/// Health status reporting.
pub mod health_service;
/// Registry of live local streams.
pub mod registry;
/// Fire-and-forget reward settlement seam.
pub mod rewards;
/// Shared store connection supervision.
pub mod storage_supervisor;
/// SSE stream plumbing and subscriptions.
pub mod stream_service;
