mod common;

mod termination;
mod transfer;
