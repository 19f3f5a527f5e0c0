mod enqueue_test;
mod helpers;
