/// Arithmetic mean of a student's grades. An empty list has no average:
/// the result is `None`, which is distinct from an average of zero.
pub fn grade_average(grades: &[f64]) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }
    let total: f64 = grades.iter().sum();
    Some(total / grades.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_three_grades() {
        let avg = grade_average(&[12.0, 15.0, 9.0]).expect("non-empty");
        assert!((avg - 12.0).abs() < 1e-9);
    }

    #[test]
    fn empty_list_has_no_average() {
        assert_eq!(grade_average(&[]), None);
    }

    #[test]
    fn single_grade_is_its_own_average() {
        assert_eq!(grade_average(&[7.5]), Some(7.5));
    }

    #[test]
    fn order_does_not_matter() {
        assert_eq!(grade_average(&[1.0, 2.0, 3.0]), grade_average(&[3.0, 1.0, 2.0]));
    }
}
