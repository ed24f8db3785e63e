//! Property tests for the row channel: FIFO order and no loss/duplication
//! under backpressure, for arbitrary row sequences and capacities.

use proptest::prelude::*;
use rowflow::pipeline::{RowChannel, StopSignal};
use rowflow::row::{Column, Row, Schema, ValueType};
use std::sync::Arc;
use std::thread;

fn int_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![Column::new("n", ValueType::Integer)]))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fifo_order_preserved(values in prop::collection::vec(any::<i64>(), 0..200)) {
        // Capacity exceeds the row count: puts never block on this thread.
        let channel = RowChannel::new(256, StopSignal::new());
        let schema = int_schema();
        for &n in &values {
            channel.put(Arc::clone(&schema), Row::builder().integer(n).build());
        }
        channel.finished();

        let mut received = Vec::new();
        while let Some((_, row)) = channel.get() {
            received.push(row.get(0).unwrap().as_integer().unwrap());
        }
        prop_assert_eq!(received, values);
    }

    #[test]
    fn prop_no_loss_under_backpressure(
        values in prop::collection::vec(any::<i64>(), 1..300),
        capacity in 1usize..32,
    ) {
        let channel = RowChannel::new(capacity, StopSignal::new());
        let schema = int_schema();

        let producer = {
            let channel = channel.clone();
            let schema = Arc::clone(&schema);
            let values = values.clone();
            thread::spawn(move || {
                for n in values {
                    channel.put(Arc::clone(&schema), Row::builder().integer(n).build());
                }
                channel.finished();
            })
        };

        let mut received = Vec::new();
        while let Some((_, row)) = channel.get() {
            received.push(row.get(0).unwrap().as_integer().unwrap());
        }
        producer.join().unwrap();

        prop_assert_eq!(received, values);
    }
}
