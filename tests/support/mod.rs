pub mod mock_queue;
