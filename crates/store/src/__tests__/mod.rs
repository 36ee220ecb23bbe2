mod helpers;
mod ordering;
mod rewrite_queue;
