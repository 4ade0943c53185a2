//! Example fitting the boosted classifier on labelled data points.
//!
//! Two toy "letters" are told apart by a pair of features, then the fitted
//! model is queried and its error handling exercised.

use gbdt::{GbdtClassifier, GbdtError, GbdtParams};
use handsign_helpers::DataPoint;
use ndarray::array;

fn main() {
    println!("Gradient-Boosted Tree Classifier Example");
    println!("========================================");

    let training_data = vec![
        DataPoint::new(array![0.10, 0.90], "L"),
        DataPoint::new(array![0.15, 0.85], "L"),
        DataPoint::new(array![0.20, 0.95], "L"),
        DataPoint::new(array![0.12, 0.80], "L"),
        DataPoint::new(array![0.90, 0.10], "V"),
        DataPoint::new(array![0.85, 0.20], "V"),
        DataPoint::new(array![0.95, 0.15], "V"),
        DataPoint::new(array![0.80, 0.05], "V"),
    ];
    let params = GbdtParams {
        n_rounds: 20,
        min_child_weight: 0.0,
        ..GbdtParams::default()
    };

    println!("\n1. Fitting on {} points:", training_data.len());
    let classifier = match GbdtClassifier::fit_points(&training_data, &params) {
        Ok(classifier) => {
            println!(
                "   Fitted {} rounds over classes {:?}",
                classifier.trees().len(),
                classifier.classes()
            );
            classifier
        }
        Err(e) => {
            println!("   Fitting failed: {}", e);
            return;
        }
    };

    println!("\n2. Predicting unseen points:");
    for point in [array![0.18, 0.88], array![0.88, 0.12]] {
        match (
            classifier.predict(point.view()),
            classifier.predict_proba(point.view()),
        ) {
            (Ok(label), Ok(proba)) => println!("   {} -> {} {:.3}", point, label, proba),
            (Err(e), _) | (_, Err(e)) => println!("   Prediction failed: {}", e),
        }
    }

    println!("\n3. Handling a point of the wrong width:");
    match classifier.predict(array![0.5].view()) {
        Err(GbdtError::MismatchedDimensions) => {
            println!("   Caught expected error: {}", GbdtError::MismatchedDimensions)
        }
        other => println!("   Unexpected result: {:?}", other),
    }

    println!("\n4. Handling a single-class training set:");
    let one_letter = vec![
        DataPoint::new(array![0.1, 0.2], "L"),
        DataPoint::new(array![0.3, 0.4], "L"),
    ];
    match GbdtClassifier::fit_points(&one_letter, &params) {
        Err(GbdtError::SingleClass) => {
            println!("   Caught expected error: {}", GbdtError::SingleClass)
        }
        other => println!("   Unexpected result: {:?}", other.map(|c| c.classes().to_vec())),
    }
}
