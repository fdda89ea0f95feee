// Daemon module - detaching the master and tracking it through a PID file

pub mod daemonize;
pub mod pid;

pub use daemonize::daemonize;
pub use pid::PidFile;
