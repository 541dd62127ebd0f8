use uuid::Uuid;

/// 每次上游调用独立的 requestId (agent- 前缀)
pub fn generate_request_id() -> String {
    format!("agent-{}", Uuid::new_v4())
}

/// Session id shared by every call a gateway instance makes.
pub fn generate_session_id() -> String {
    format!("sid-{}", Uuid::new_v4().simple())
}
