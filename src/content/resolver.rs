//! Exercise and lesson lookup
//!
//! Every exercise lookup goes through the same `LevelFilter`, whether it is a
//! listing, an editor lookup, a verification or an audit.

use super::{Course, Exercise, Lesson};

/// Level compatibility between a course and its exercises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFilter {
    expected: Option<String>,
}

impl LevelFilter {
    /// Filter for a course; no level (absent or empty) admits everything
    pub fn for_course(course: &Course) -> Self {
        Self {
            expected: course
                .level
                .as_deref()
                .filter(|level| !level.is_empty())
                .map(str::to_lowercase),
        }
    }

    pub fn admits(&self, exercise: &Exercise) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => {
                exercise.level.as_deref().unwrap_or_default().to_lowercase() == *expected
            }
        }
    }
}

/// First exercise with a matching id (and lesson, when given) that passes the level filter.
///
/// An id match with the wrong level does not end the scan: a later duplicate
/// with a compatible level still wins.
pub fn find_exercise<'a>(
    course: &Course,
    exercises: &'a [Exercise],
    exercise_id: &str,
    lesson_id: Option<&str>,
) -> Option<&'a Exercise> {
    let filter = LevelFilter::for_course(course);
    exercises.iter().find(|exercise| {
        exercise.id.matches(exercise_id)
            && lesson_id.map_or(true, |lesson| belongs_to(exercise, lesson))
            && filter.admits(exercise)
    })
}

pub fn eligible_exercises<'a>(course: &Course, exercises: &'a [Exercise]) -> Vec<&'a Exercise> {
    let filter = LevelFilter::for_course(course);
    exercises.iter().filter(|e| filter.admits(e)).collect()
}

pub fn exercises_for_lesson<'a>(
    course: &Course,
    exercises: &'a [Exercise],
    lesson_id: &str,
) -> Vec<&'a Exercise> {
    let filter = LevelFilter::for_course(course);
    exercises
        .iter()
        .filter(|e| belongs_to(e, lesson_id) && filter.admits(e))
        .collect()
}

fn belongs_to(exercise: &Exercise, lesson_id: &str) -> bool {
    exercise
        .lesson_id
        .as_ref()
        .is_some_and(|id| id.matches(lesson_id))
}

#[derive(Debug, Clone, Copy)]
pub struct LessonMatch<'a> {
    /// Position in course order
    pub index: usize,
    pub lesson: &'a Lesson,
}

pub fn find_lesson<'a>(lessons: &'a [Lesson], lesson_id: &str) -> Option<LessonMatch<'a>> {
    lessons
        .iter()
        .enumerate()
        .find(|(_, lesson)| lesson.id.matches(lesson_id))
        .map(|(index, lesson)| LessonMatch { index, lesson })
}

/// Lesson after `index`, none for the last one
pub fn next_lesson(lessons: &[Lesson], index: usize) -> Option<&Lesson> {
    lessons.get(index.checked_add(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::RecordId;

    fn course(level: Option<&str>) -> Course {
        Course {
            id: "py".into(),
            level: level.map(str::to_string),
            ..Default::default()
        }
    }

    fn exercise(id: &str, lesson: i64, level: &str, title: &str) -> Exercise {
        Exercise {
            id: id.into(),
            lesson_id: Some(RecordId::from(lesson)),
            level: Some(level.to_string()),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn lesson(id: &str) -> Lesson {
        Lesson {
            id: id.into(),
            title: format!("Lição {}", id),
            ..Default::default()
        }
    }

    #[test]
    fn test_level_filter_is_case_insensitive() {
        let filter = LevelFilter::for_course(&course(Some("Básico")));

        assert!(filter.admits(&exercise("1", 1, "básico", "")));
        assert!(filter.admits(&exercise("1", 1, "BÁSICO", "")));
        assert!(!filter.admits(&exercise("1", 1, "Intermediário", "")));
        assert!(!filter.admits(&Exercise::default()));
    }

    #[test]
    fn test_no_course_level_admits_everything() {
        for level in [None, Some("")] {
            let filter = LevelFilter::for_course(&course(level));
            assert!(filter.admits(&exercise("1", 1, "Avançado", "")));
            assert!(filter.admits(&Exercise::default()));
        }
    }

    #[test]
    fn test_find_exercise_keeps_scanning_past_level_mismatch() {
        let exercises = vec![
            exercise("1", 1, "Intermediário", "wrong level"),
            exercise("1", 1, "básico", "right level"),
        ];

        let found = find_exercise(&course(Some("Básico")), &exercises, "1", None).unwrap();
        assert_eq!(found.title, "right level");
    }

    #[test]
    fn test_find_exercise_misses() {
        let exercises = vec![exercise("1", 1, "Intermediário", "")];

        assert!(find_exercise(&course(Some("Básico")), &exercises, "1", None).is_none());
        assert!(find_exercise(&course(None), &exercises, "2", None).is_none());
        assert!(find_exercise(&course(None), &exercises, "", None).is_none());
    }

    #[test]
    fn test_find_exercise_scoped_to_lesson() {
        let exercises = vec![
            exercise("1", 1, "básico", "lesson one"),
            exercise("1", 2, "básico", "lesson two"),
        ];
        let course = course(Some("básico"));

        assert_eq!(find_exercise(&course, &exercises, "1", Some("2")).unwrap().title, "lesson two");
        assert!(find_exercise(&course, &exercises, "1", Some("3")).is_none());
    }

    #[test]
    fn test_listings_apply_the_same_filter() {
        let exercises = vec![
            exercise("1", 1, "básico", "a"),
            exercise("2", 1, "Intermediário", "b"),
            exercise("3", 2, "Básico", "c"),
        ];
        let course = course(Some("Básico"));

        let titles: Vec<_> = eligible_exercises(&course, &exercises)
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, ["a", "c"]);

        let titles: Vec<_> = exercises_for_lesson(&course, &exercises, "1")
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, ["a"]);
    }

    #[test]
    fn test_lesson_order() {
        let lessons = vec![lesson("intro"), lesson("vars"), lesson("loops")];

        let found = find_lesson(&lessons, "vars").unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(next_lesson(&lessons, found.index).unwrap().id.as_text(), "loops");
        assert!(next_lesson(&lessons, 2).is_none());
        assert!(find_lesson(&lessons, "missing").is_none());
    }
}
