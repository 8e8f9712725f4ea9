//! Integration tests: full cycles against an in-memory store with
//! scripted quote, chain and key-store collaborators.

mod cycle;
mod mocks;
