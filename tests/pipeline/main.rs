mod access;
mod cache;
mod governor;
mod providers;
mod store;
mod support;
