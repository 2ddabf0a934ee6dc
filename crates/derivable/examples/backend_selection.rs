//! Example comparing the differentiation backends on one function.

use derivable::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// `F(x) = [x1^2, x1 * x2^3]`.
struct Model;

impl NumericFunction for Model {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        let x = x.as_vector_of(2)?;
        Ok(Value::from_vec(vec![
            x[0].clone().powi(2),
            x[0].clone() * x[1].clone().powi(3),
        ]))
    }
}

fn main() {
    println!("Backend Selection Example");
    println!("=========================\n");

    let dispatcher = Arc::new(Dispatcher::default());
    let point = Value::from_vec(vec![2.0, 1.0]);

    println!("Available backends:");
    for tag in dispatcher.registry().list_backends() {
        println!("  - {}", tag);
    }
    println!();

    for tag in dispatcher.registry().list_backends() {
        println!("Backend: {}", tag);

        let start = Instant::now();
        match dispatcher.jacobian(&tag, Arc::new(Model), None) {
            Ok(Guarded::Completed(jac)) => {
                let built = start.elapsed();
                let value = jac.call(&point).unwrap();
                println!("  Build time: {:?}", built);
                println!("  Jacobian at {:?}: {:?}", point.flatten(), value.flatten());
            }
            Ok(Guarded::TimedOut) => println!("  Timed out"),
            Err(err) => println!("  Unavailable: {}", err),
        }
        println!();
    }

    // Memoised derivatives
    println!("DerivableFunction:");
    let f = DerivableFunction::builder(Model)
        .backend(BackendTag::Symbolic)
        .build(Arc::clone(&dispatcher))
        .unwrap();
    println!("  Shapes: {} -> {}", f.input_shape(), f.output_shape());
    println!("  First derivative kind: {}", f.first_kind());

    for attempt in 1..=2 {
        let start = Instant::now();
        let jac = f.eval_derivative(&point).unwrap().completed().unwrap();
        println!("  Request {}: {:?} in {:?}", attempt, jac.flatten(), start.elapsed());
    }
}
