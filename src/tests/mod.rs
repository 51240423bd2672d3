
mod event_loop;
mod properties;
