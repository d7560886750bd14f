// Library root: the live poll session core and the pieces shared between the
// server and its clients (wire protocol, answer window, client models).

pub mod participant;
pub mod poll;
pub mod presenter;
pub mod protocol;
pub mod results;
pub mod session;
pub mod window;
pub mod ws_server;
