//! Static catalog content: opaque data the service presents, never computes.

pub struct Center {
    pub name: &'static str,
    pub studio: &'static str,
    pub phone: &'static str,
    pub address: &'static str,
    pub hours: &'static str,
}

pub const CENTER: Center = Center {
    name: "Edu Center",
    studio: "X.press Studio",
    phone: "01000000000",
    address: "90th Street, Nasr City, Cairo",
    hours: "Saturday - Thursday, 10am - 10pm",
};

pub struct Course {
    pub name: &'static str,
    pub price: &'static str,
    pub duration: &'static str,
}

pub const COURSES: [Course; 5] = [
    Course {
        name: "Modern Teaching Skills",
        price: "800 EGP",
        duration: "4 weeks (8 sessions)",
    },
    Course {
        name: "Educational Content Production",
        price: "1200 EGP",
        duration: "3 weeks (6 sessions)",
    },
    Course {
        name: "E-learning Fundamentals",
        price: "1500 EGP",
        duration: "6 weeks (12 sessions)",
    },
    Course {
        name: "Designing Teaching Materials",
        price: "900 EGP",
        duration: "3 weeks (6 sessions)",
    },
    Course {
        name: "Communication and Presentation",
        price: "600 EGP",
        duration: "2 weeks (4 sessions)",
    },
];

pub struct Package {
    pub name: &'static str,
    pub hours: &'static str,
    pub price: &'static str,
}

pub const PACKAGES: [Package; 4] = [
    Package {
        name: "Quick Package",
        hours: "1 hour",
        price: "300 EGP",
    },
    Package {
        name: "Course Package",
        hours: "3 hours",
        price: "700 EGP",
    },
    Package {
        name: "Professional Package",
        hours: "full day (8 hours)",
        price: "2000 EGP",
    },
    Package {
        name: "Monthly Package",
        hours: "8 hours / month",
        price: "1500 EGP / month",
    },
];

pub fn courses_text() -> String {
    let mut text = format!("{} courses:\n\n", CENTER.name);
    for course in &COURSES {
        text.push_str(&format!(
            "- {} | {} | {}\n",
            course.name, course.duration, course.price
        ));
    }
    text.push_str("\nAsk us about any course, or say \"book a course\" to reserve a spot.");
    text
}

pub fn packages_text() -> String {
    let mut text = format!("{} packages:\n\n", CENTER.studio);
    for package in &PACKAGES {
        text.push_str(&format!(
            "- {} ({}) | {}\n",
            package.name, package.hours, package.price
        ));
    }
    text.push_str("\nSay \"book a session\" to reserve the studio.");
    text
}

pub fn contact_text() -> String {
    format!(
        "Contact us:\n{}\n{}\n{}\n\nOr just write here and we will get back to you.",
        CENTER.phone, CENTER.address, CENTER.hours
    )
}

pub fn contact_fallback() -> String {
    format!(
        "I cannot answer right now. Please contact us directly on {}.",
        CENTER.phone
    )
}

/// Built-in knowledge text used when no knowledge file is available.
pub fn default_knowledge() -> String {
    let mut text = format!(
        "You are the assistant for {} and {}.\n\
         Address: {} | Phone: {} | Hours: {}\n\n\
         Available courses:\n",
        CENTER.name, CENTER.studio, CENTER.address, CENTER.phone, CENTER.hours
    );
    for course in &COURSES {
        text.push_str(&format!(
            "- {}: {}, duration: {}\n",
            course.name, course.price, course.duration
        ));
    }
    text.push_str("\nStudio packages:\n");
    for package in &PACKAGES {
        text.push_str(&format!(
            "- {}: {}, price: {}\n",
            package.name, package.hours, package.price
        ));
    }
    text
}
