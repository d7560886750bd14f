// Broadcast coordinator: owns the session manager and fans its state changes
// out to every connected client.

pub mod coordinator;
pub mod registry;
