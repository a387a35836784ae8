//! Wire constants shared by the status server and client

/// Path of the status resource served to friends
pub const GET_STATUS_REQUEST_PATH: &str = "/status";

/// Virtual port the hidden service exposes
pub const HIDDEN_SERVICE_PORT: u16 = 443;

/// Content type of status responses
pub const STATUS_CONTENT_TYPE: &str = "application/json";
