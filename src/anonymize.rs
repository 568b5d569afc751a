use std::collections::HashMap;

use rand::Rng;

use crate::models::{Enrollment, User};

// Color first names and produce-aisle last names give a large pool of
// obviously-fake pseudonyms with little chance of collision.
const FIRST_NAMES: &[&str] = &[
    "Alabaster", "Almond", "Arylide", "Ash", "Beige", "Bistre", "Black", "Bleu", "Blizzard",
    "Blood", "Blue", "Brass", "Brick", "Bronze", "Brown", "Cadmium", "Cafe Au Lait", "Canary",
    "Carmine", "Carnation", "Cedar", "Cerise", "Cerulean", "Champagne", "Chartreuse", "Chocolate",
    "Chrome", "Cinnamon", "Cobalt", "Cocoa", "Coffee", "Copper", "Coral", "Cornflower", "Cotton",
    "Cyan", "Denim", "Ecru", "Emerald", "Fallow", "Falu", "Fern", "Flax", "Forest", "Fuchsia",
    "Fulvous", "Goldenrod", "Gray", "Green", "Indigo", "Khaki", "Latte", "Lava", "Lavender",
    "Lilac", "Magenta", "Maroon", "Mauve", "Olive", "Opal", "Orange", "Pink", "Purple",
    "Raspberry", "Red", "Rose", "Ruby", "Saffron", "Salmon", "Sand", "Sapphire", "Satin",
    "Sienna", "Tangerine", "Taupe", "Turquoise", "Umber", "Vermillion", "Violet", "White",
    "Yellow",
];

const LAST_NAMES: &[&str] = &[
    "Acorn", "Alfalfa", "Amrud", "Anise", "Artichoke", "Arugula", "Asparagus", "Aubergine",
    "Avacado", "Azuki", "Banana", "Basil", "Bean", "Beet", "Bok Choy", "Borlotti", "Broccoli",
    "Cabbage", "Caraway", "Carrot", "Cauliflower", "Celeriac", "Celery", "Chamomile", "Chard",
    "Chestnut", "Chickpea", "Chive", "Cilantro", "Collard Green", "Coriander", "Cucumber",
    "Daikon", "Delicata", "Dill", "Eggplant", "Endive", "Fennel", "Frisee", "Garbanzo", "Garlic",
    "Ginger", "Habanero", "Horseradish", "Jalapeño", "Jicama", "Kale", "Kohlrabi", "Lavender",
    "Leek", "Lemon", "Lemon Grass", "Lentils", "Lettuce", "Lima Bean", "Mangel-Wurzel",
    "Mangetout", "Marjoram", "Melon", "Mushroom", "Mustard", "Nettles", "Okra", "Onion",
    "Oregano", "Paprika", "Parsley", "Parsnip", "Pea", "Pepper", "Potato", "Pumpkin", "Quandong",
    "Quinoa", "Radicchio", "Radish", "Rhubarb", "Rosemary", "Rutabaga", "Sage", "Salsify",
    "Scallion", "Shallot", "Skirret", "Soy", "Spinach", "Sprout", "Squash", "Sunchoke", "Sugar",
    "Sweetcorn", "Taro", "Tat", "Tat Soi", "Thyme", "Tomato", "Topinambur", "Turnip", "Wasabi",
];

// Assigns a pseudonym to every student in the enrollment list. Instructors,
// TAs and support roles keep their real names, and a student who already has
// a pseudonym keeps it for the rest of the run.
pub fn assign_pseudonyms<'a, R, I>(rng: &mut R, users: &mut HashMap<i64, User>, enrollments: I)
where
    R: Rng,
    I: IntoIterator<Item = &'a Enrollment>,
{
    for enrollment in enrollments {
        if enrollment.role != "Student" {
            continue;
        }
        let Some(user) = users.get_mut(&enrollment.user_id) else {
            continue;
        };
        if user.pseudonym.is_some() {
            continue;
        }
        let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
        let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
        user.pseudonym = Some(format!("{first} {last}"));
    }
}
